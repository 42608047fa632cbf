//! Capability probing seam for layout builders.
//!
//! Some layout decisions can only be made by asking the live controller
//! (extended I/O bank direction, analog range jumpers, daughterboard
//! presence). The builders take a [`CapabilityProbe`] instead of a
//! transport so they stay pure with respect to I/O: in production the
//! probe is the controller's own command path, in tests it is a
//! [`CannedProbe`] loaded with scripted replies.

use std::collections::HashMap;

use async_trait::async_trait;
use dmclib_core::error::{Error, Result};

/// A source of answers to capability queries.
///
/// `query` issues one command and returns its trimmed reply. A command
/// the controller refuses surfaces as
/// [`Error::CommandRejected`](dmclib_core::Error::CommandRejected);
/// builders treat that as "feature absent", not as a failure.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Issue one command and return its reply text.
    async fn query(&self, cmd: &str) -> Result<String>;
}

/// A probe answering from a table of canned replies.
///
/// Commands with no canned reply behave like a refused command, which
/// is what a controller without the probed feature does.
#[derive(Debug, Default)]
pub struct CannedProbe {
    replies: HashMap<String, String>,
}

impl CannedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a canned reply for a command.
    pub fn reply(mut self, cmd: &str, reply: &str) -> Self {
        self.replies.insert(cmd.to_string(), reply.to_string());
        self
    }
}

#[async_trait]
impl CapabilityProbe for CannedProbe {
    async fn query(&self, cmd: &str) -> Result<String> {
        match self.replies.get(cmd) {
            Some(reply) => Ok(reply.clone()),
            None => Err(Error::CommandRejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_probe_answers_and_refuses() {
        let probe = CannedProbe::new().reply("MG _CO", "3");
        assert_eq!(probe.query("MG _CO").await.unwrap(), "3");
        assert!(matches!(
            probe.query("ID").await,
            Err(Error::CommandRejected)
        ));
    }
}
