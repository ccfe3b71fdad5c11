use std::collections::HashMap;
use std::ops::Deref;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resp::Hi;
use super::{JobId, WorkerId};
use crate::error::Error;
use crate::proto::EXPECTED_PROTOCOL_VERSION;

pub(crate) trait FaktoryCommand {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error>;
}

fn issue_json<B: Serialize>(dst: &mut BytesMut, verb: &'static str, body: &B) -> Result<(), Error> {
    dst.put_slice(verb.as_bytes());
    dst.put_u8(b' ');
    let body = serde_json::to_vec(body).map_err(Error::Serialization)?;
    dst.put_slice(&body);
    dst.put_slice(b"\r\n");
    Ok(())
}

// ----------------------------------------------

pub(crate) struct Info;

impl FaktoryCommand for Info {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_slice(b"INFO\r\n");
        Ok(())
    }
}

// ----------------------------------------------

pub(crate) struct Flush;

impl FaktoryCommand for Flush {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_slice(b"FLUSH\r\n");
        Ok(())
    }
}

// ----------------------------------------------

pub(crate) struct End;

impl FaktoryCommand for End {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_slice(b"END\r\n");
        Ok(())
    }
}

// ----------------------------------------------

#[derive(Serialize)]
pub(crate) struct Ack {
    #[serde(rename = "jid")]
    job_id: JobId,
}

impl Ack {
    pub fn new(job_id: JobId) -> Ack {
        Ack { job_id }
    }
}

impl FaktoryCommand for Ack {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        issue_json(dst, "ACK", self)
    }
}

// ----------------------------------------------

const MAX_BACKTRACE_LINES: usize = 100;

/// The payload of a `FAIL` report: why a fetched job could not be completed.
///
/// The error type and message are reported back to the Faktory server so
/// that they show up in its Web UI, and so that the job can be retried with
/// knowledge of its past failures. A backtrace may be attached with
/// [`set_backtrace`](Fail::set_backtrace).
#[derive(Serialize, Debug, Clone)]
pub struct Fail {
    #[serde(rename = "jid")]
    job_id: JobId,
    #[serde(rename = "errtype")]
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    backtrace: Vec<String>,
}

impl Fail {
    /// Construct a failure report for the given job.
    pub fn new(
        job_id: JobId,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Fail {
            job_id,
            kind: kind.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    /// Construct a failure report with the catch-all `unknown` error type.
    pub fn generic(job_id: JobId, message: impl Into<String>) -> Self {
        Fail::new(job_id, "unknown", message)
    }

    /// Attach a backtrace to this failure report.
    ///
    /// The server caps what it stores per job; anything beyond the first
    /// 100 lines is discarded before transmission.
    pub fn set_backtrace(&mut self, lines: Vec<String>) {
        self.backtrace = lines;
        self.backtrace.truncate(MAX_BACKTRACE_LINES);
    }

    /// The id of the job this failure report is about.
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl FaktoryCommand for Fail {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        issue_json(dst, "FAIL", self)
    }
}

// ----------------------------------------------

pub(crate) struct Fetch<'a, Q>
where
    Q: AsRef<str>,
{
    queues: &'a [Q],
}

impl<'a, Q> From<&'a [Q]> for Fetch<'a, Q>
where
    Q: AsRef<str>,
{
    fn from(queues: &'a [Q]) -> Self {
        Fetch { queues }
    }
}

impl<Q> FaktoryCommand for Fetch<'_, Q>
where
    Q: AsRef<str>,
{
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_slice(b"FETCH");
        for q in self.queues {
            dst.put_u8(b' ');
            dst.put_slice(q.as_ref().as_bytes());
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

// ----------------------------------------------

#[derive(Serialize)]
pub(crate) struct Heartbeat {
    wid: WorkerId,
}

impl Heartbeat {
    pub fn new(wid: WorkerId) -> Heartbeat {
        Heartbeat { wid }
    }
}

impl FaktoryCommand for Heartbeat {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        issue_json(dst, "BEAT", self)
    }
}

// ----------------------------------------------

#[derive(Serialize)]
pub(crate) struct Hello {
    #[serde(rename = "v")]
    pub version: usize,

    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wid: Option<WorkerId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<usize>,

    pub labels: Vec<String>,

    /// Hash is hex(sha256(password + salt)), fed back through sha256 for
    /// every handshake iteration beyond the first.
    #[serde(rename = "pwdhash")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl Default for Hello {
    fn default() -> Self {
        Hello {
            version: EXPECTED_PROTOCOL_VERSION,
            hostname: None,
            wid: None,
            pid: None,
            labels: Vec::new(),
            password_hash: None,
        }
    }
}

impl Hello {
    pub fn set_password(&mut self, hi: &Hi, password: &str) {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        if let Some(ref salt) = hi.salt {
            hasher.update(salt.as_bytes());
        }
        let mut digest = hasher.finalize();
        for _ in 1..hi.iterations.unwrap_or(1) {
            digest = Sha256::digest(digest);
        }
        self.password_hash = Some(format!("{:x}", digest));
    }
}

impl FaktoryCommand for Hello {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        issue_json(dst, "HELLO", self)
    }
}

// ----------------------------------------------

/// Information on a job's last failure, as recorded by the server.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Failure {
    retry_count: usize,
    failed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(rename = "errtype")]
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backtrace: Option<Vec<String>>,
}

impl Failure {
    /// Number of times this job has been retried so far.
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// The error message given on the last `FAIL` for this job, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The error type given on the last `FAIL` for this job, if any.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }
}

/// A Faktory job.
///
/// To create a job, use [`Job::new`] with the job's type and arguments, or
/// use [`JobBuilder`] to set any of the other fields as well:
///
/// ```
/// use faktory_client::{Job, JobBuilder};
///
/// let _: Job = JobBuilder::new("order_fulfilled")
///     .args(vec!["order-8172"])
///     .queue("critical")
///     .build();
/// ```
///
/// Fields unknown to this client that the caller wants to round-trip
/// through the server belong in [`custom`](Job::custom).
#[derive(Serialize, Deserialize, Debug, Clone, Builder)]
#[builder(
    custom_constructor,
    setter(into),
    build_fn(name = "try_build", private)
)]
pub struct Job {
    /// The job's unique identifier.
    ///
    /// Assigned at construction; provide your own through the builder if
    /// your application already has a natural job key.
    #[builder(default = "JobId::random()")]
    pub jid: JobId,

    /// The queue this job belongs to. Usually `default`.
    #[builder(default = "\"default\".into()")]
    pub queue: String,

    /// The job's type, called `jobtype` by the Faktory server.
    #[serde(rename = "jobtype")]
    #[builder(setter(custom))]
    pub kind: String,

    /// The arguments provided for this job.
    #[builder(setter(custom), default = "Vec::new()")]
    pub args: Vec<Value>,

    /// When this job was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default = "Some(Utc::now())")]
    pub created_at: Option<DateTime<Utc>>,

    /// When this job was supplied to the Faktory server.
    ///
    /// Set by the server; read-only for clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(setter(skip))]
    pub enqueued_at: Option<DateTime<Utc>>,

    /// When this job is scheduled for.
    ///
    /// Defaults to immediately.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub at: Option<DateTime<Utc>>,

    /// How long to allow this job to run for, in seconds.
    ///
    /// Defaults to 600 seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default = "Some(600)")]
    pub reserve_for: Option<usize>,

    /// Number of times to retry this job.
    ///
    /// Defaults to 25.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default = "Some(25)")]
    pub retry: Option<isize>,

    /// The priority of this job from 9 (highest priority) to 1 (lowest
    /// priority).
    ///
    /// Not sent unless set; the server treats jobs without a priority as
    /// priority 5.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub priority: Option<u8>,

    /// Number of lines of backtrace to keep if this job fails.
    ///
    /// Defaults to 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default = "Some(0)")]
    pub backtrace: Option<usize>,

    /// Data about this job's most recent failure, if any.
    ///
    /// Set by the server; read-only for clients.
    #[serde(skip_serializing)]
    #[serde(default)]
    #[builder(setter(skip))]
    failure: Option<Failure>,

    /// Extra context to include with the job.
    ///
    /// Faktory workers can have plugins and middleware which need to store
    /// additional context with the job payload. Faktory supports a custom
    /// hash to store arbitrary key-value pairs in the job; any keys this
    /// client does not know about pass through it unchanged.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    #[serde(default)]
    #[builder(default)]
    pub custom: HashMap<String, Value>,
}

impl JobBuilder {
    /// Create a builder for a job of type `kind`.
    pub fn new(kind: impl Into<String>) -> JobBuilder {
        JobBuilder {
            kind: Some(kind.into()),
            ..JobBuilder::create_empty()
        }
    }

    /// Set the arguments provided for this job.
    pub fn args<A>(&mut self, args: Vec<A>) -> &mut Self
    where
        A: Into<Value>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Consume the builder, producing the job.
    pub fn build(&self) -> Job {
        self.try_build()
            .expect("all required fields have been set at construction")
    }
}

impl Job {
    /// Create a new job of type `kind`, with the given arguments.
    pub fn new<S, A>(kind: S, args: Vec<A>) -> Self
    where
        S: Into<String>,
        A: Into<Value>,
    {
        JobBuilder::new(kind).args(args).build()
    }

    /// Place this job on the given `queue`.
    ///
    /// If this method is not called (or `queue` set through the builder),
    /// the queue will be set to `default`.
    pub fn on_queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.queue = queue.into();
        self
    }

    /// This job's id.
    pub fn id(&self) -> &JobId {
        &self.jid
    }

    /// Data about this job's most recent failure, if any.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }
}

// ----------------------------------------------

pub(crate) struct Push(Job);

impl Deref for Push {
    type Target = Job;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Job> for Push {
    fn from(j: Job) -> Self {
        Push(j)
    }
}

impl FaktoryCommand for Push {
    fn issue(&self, dst: &mut BytesMut) -> Result<(), Error> {
        issue_json(dst, "PUSH", &**self)
    }
}
