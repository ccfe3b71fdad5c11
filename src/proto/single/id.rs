use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::utils;

macro_rules! string_wrapper {
    ($new_type:ident) => {
        impl<S> From<S> for $new_type
        where
            S: AsRef<str>,
        {
            fn from(value: S) -> Self {
                $new_type(value.as_ref().to_owned())
            }
        }

        impl Deref for $new_type {
            type Target = String;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $new_type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

/// Job identifier.
///
/// The Faktory server expects a [`jid`](struct.Job.html#structfield.jid) of a
/// reasonable length (at least 8 chars), which you should take into account
/// when creating a new instance of `JobId`. If you do not have any domain,
/// product or organisation specific requirements, you may prefer to have a
/// random job identifier generated for you with [`random`](JobId::random).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Internally, generates a 16-char long random string.
    pub fn random() -> Self {
        Self(utils::gen_random_jid())
    }
}

string_wrapper!(JobId);

/// Worker identifier.
///
/// This identifies a long-running worker process to the server and is
/// required for the `BEAT` heartbeat exchange. If you do not have any
/// domain, product or organisation specific requirements, you may prefer to
/// have a random worker identifier generated for you with
/// [`random`](WorkerId::random).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Internally, generates a 32-char long random string.
    pub fn random() -> Self {
        Self(utils::gen_random_wid())
    }
}

string_wrapper!(WorkerId);
