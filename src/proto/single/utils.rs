use rand::{thread_rng, Rng};

const JOB_ID_LENGTH: usize = 16;
const WORKER_ID_LENGTH: usize = 32;

fn gen_random_id(length: usize) -> String {
    thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .map(char::from)
        .take(length)
        .collect()
}

pub(crate) fn gen_random_jid() -> String {
    gen_random_id(JOB_ID_LENGTH)
}

pub(crate) fn gen_random_wid() -> String {
    gen_random_id(WORKER_ID_LENGTH)
}
