mod cmd;
mod id;
mod resp;
mod utils;

// commands that users can issue
pub use cmd::{Fail, Failure, Job, JobBuilder};
pub use id::{JobId, WorkerId};

pub(crate) use cmd::{Ack, End, FaktoryCommand, Fetch, Flush, Heartbeat, Hello, Info, Push};
pub(crate) use resp::{bad, read_json, Frame, Hi, RespCodec};
