use anyhow::Result;
use async_trait::async_trait;
use object_store::path::Path;
use shared::IngestionMessage;
use std::sync::Mutex;
use std::time::Duration;
use crate::queue::IngestionQueue;
use crate::storage::UploadSigner;

/// Queue fake that keeps every JSON body it accepts.
#[derive(Default)]
pub struct RecordingQueue {
    sent: Mutex<Vec<String>>,
    fail_after: Option<usize>,
    stall: bool,
}

impl RecordingQueue {
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            fail_after: Some(accepted),
            ..Self::default()
        }
    }

    /// A queue whose sends never complete.
    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Self::default()
        }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionQueue for RecordingQueue {
    async fn send(&self, message: &IngestionMessage) -> Result<()> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        let mut sent = self.sent.lock().unwrap();
        if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
            anyhow::bail!("queue unavailable");
        }
        sent.push(message.to_json()?);
        Ok(())
    }
}

pub struct FakeSigner {
    pub fail: bool,
}

#[async_trait]
impl UploadSigner for FakeSigner {
    async fn presign_put(&self, path: &Path, expires_in: Duration) -> Result<String> {
        if self.fail {
            anyhow::bail!("credentials expired");
        }
        Ok(format!(
            "https://bucket.example.com/{}?X-Amz-Expires={}",
            path,
            expires_in.as_secs()
        ))
    }
}
