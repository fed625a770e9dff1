//! Out-of-band delivery of one-time codes.

use async_trait::async_trait;
use tracing::info;

/// Sends a one-time code to a phone number.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, phone: &str, code: &str) -> anyhow::Result<()>;
}

/// Development sender: writes the code to the log instead of an SMS gateway.
#[derive(Debug, Default, Clone)]
pub struct LogSender;

#[async_trait]
impl OtpSender for LogSender {
    async fn send(&self, phone: &str, code: &str) -> anyhow::Result<()> {
        info!(phone = %phone, code = %code, "OTP issued (log delivery)");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures every delivered code for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingSender {
        pub(crate) sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        pub(crate) fn last_code(&self) -> Option<String> {
            self.sent.lock().unwrap().last().map(|(_, code)| code.clone())
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OtpSender for RecordingSender {
        async fn send(&self, phone: &str, code: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((phone.to_string(), code.to_string()));
            Ok(())
        }
    }

    /// Always fails, for exercising delivery errors.
    pub(crate) struct FailingSender;

    #[async_trait]
    impl OtpSender for FailingSender {
        async fn send(&self, _phone: &str, _code: &str) -> anyhow::Result<()> {
            anyhow::bail!("gateway unreachable")
        }
    }
}
