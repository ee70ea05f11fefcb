//! A place to put problems that aren't worth failing over.
//!
//! Plenty of archives in the wild are slightly off: local headers that disagree
//! with the central directory, odd versions to extract, comments after the
//! EOCD... We read them anyway, but note what we saw here.

use log::*;

/// Whether a [`VerifyLog`] keeps what it's told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyLogMode {
    /// Messages are only sent to the `log` facade.
    #[default]
    Discard,
    /// Messages are also kept, see [`VerifyLog::logs()`].
    Collect,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyLog {
    mode: VerifyLogMode,
    messages: Vec<String>,
}

impl VerifyLog {
    pub fn new(mode: VerifyLogMode) -> Self {
        Self {
            mode,
            messages: Vec::new(),
        }
    }

    pub fn log<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        warn!("{}", message);
        if self.mode == VerifyLogMode::Collect {
            self.messages.push(message);
        }
    }

    /// Logs `message` if `condition` doesn't hold.
    ///
    /// The message is built lazily so passing checks cost nothing.
    pub fn verify<S: Into<String>, F: FnOnce() -> S>(&mut self, condition: bool, message: F) {
        if !condition {
            self.log(message());
        }
    }

    pub fn logs(&self) -> &[String] {
        &self.messages
    }

    pub fn mode(&self) -> VerifyLogMode {
        self.mode
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn discard_keeps_nothing() {
        let mut log = VerifyLog::new(VerifyLogMode::Discard);
        log.log("hi");
        assert!(log.logs().is_empty());
    }

    #[test]
    fn collect_keeps_failed_checks() {
        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        log.verify(true, || "not kept");
        log.verify(false, || format!("kept {}", 1));
        assert_eq!(log.logs(), ["kept 1"]);
    }
}
