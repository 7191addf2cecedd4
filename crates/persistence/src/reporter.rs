//! Background transcript reporter

use std::sync::Arc;
use tokio::runtime::Handle;
use voice_agent_core::{TranscriptEntry, TranscriptSink};

use crate::{ChatHistoryApi, ChatReport};

/// `TranscriptSink` that posts each entry to the chat history API
///
/// Each entry is sent on its own task so `report` never blocks the
/// delivery path. Failures are logged and counted, then dropped.
#[derive(Clone)]
pub struct ChatReporter {
    api: Arc<dyn ChatHistoryApi>,
}

impl ChatReporter {
    pub fn new(api: Arc<dyn ChatHistoryApi>) -> Self {
        Self { api }
    }
}

impl From<&TranscriptEntry> for ChatReport {
    fn from(entry: &TranscriptEntry) -> Self {
        ChatReport {
            mac_address: entry.device_id.clone(),
            session_id: entry.session_id.clone(),
            chat_type: entry.chat_type.code(),
            content: entry.content.clone(),
            report_time: entry.reported_at.timestamp(),
            audio_base64: None,
        }
    }
}

impl TranscriptSink for ChatReporter {
    fn report(&self, entry: TranscriptEntry) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(
                session_id = %entry.session_id,
                "No runtime available, dropping transcript report"
            );
            return;
        };

        let api = self.api.clone();
        handle.spawn(async move {
            let report = ChatReport::from(&entry);
            if let Err(e) = api.report_chat(report).await {
                metrics::counter!("voice_agent_report_failures_total").increment(1);
                tracing::warn!(
                    session_id = %entry.session_id,
                    chat_type = entry.chat_type.code(),
                    error = %e,
                    "Transcript report failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReportError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::sync::Notify;
    use voice_agent_core::ChatType;

    #[derive(Default)]
    struct MockApi {
        reports: Mutex<Vec<ChatReport>>,
        notify: Notify,
        fail: bool,
    }

    #[async_trait]
    impl ChatHistoryApi for MockApi {
        async fn report_chat(&self, report: ChatReport) -> Result<Option<Value>, ReportError> {
            self.reports.lock().push(report);
            self.notify.notify_one();
            if self.fail {
                Err(ReportError::Api {
                    code: 500,
                    message: "down".to_string(),
                })
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn test_report_is_sent_in_background() {
        let api = Arc::new(MockApi::default());
        let reporter = ChatReporter::new(api.clone());

        reporter.report(TranscriptEntry::new("s-1", "aa:bb", ChatType::Assistant, "Hi there."));
        api.notify.notified().await;

        let reports = api.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].mac_address, "aa:bb");
        assert_eq!(reports[0].session_id, "s-1");
        assert_eq!(reports[0].chat_type, 2);
        assert_eq!(reports[0].content, "Hi there.");
        assert!(reports[0].report_time > 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_reach_caller() {
        let api = Arc::new(MockApi {
            fail: true,
            ..Default::default()
        });
        let reporter = ChatReporter::new(api.clone());

        reporter.report(TranscriptEntry::new("s-1", "aa:bb", ChatType::User, "hello"));
        api.notify.notified().await;
        assert_eq!(api.reports.lock().len(), 1);
    }

    #[test]
    fn test_report_outside_runtime_is_dropped() {
        let api = Arc::new(MockApi::default());
        let reporter = ChatReporter::new(api.clone());
        reporter.report(TranscriptEntry::new("s-1", "aa:bb", ChatType::User, "hello"));
        assert!(api.reports.lock().is_empty());
    }
}
