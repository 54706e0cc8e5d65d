// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network-protocol adapter: submits jobs to an IPP printer.
//
// Two operations are used:
//   - Get-Printer-Attributes  (RFC 8011 §4.2.5) for `media-source-supported`
//   - Print-Job               (RFC 8011 §4.2.1)
//
// The wire work sits behind `IppTransport` so the adapter's policy (tray
// handling, status classification, timeouts) is independent of the client
// library.  `IppCrateTransport` is the production implementation.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipp::operation::IppOperation;
use ipp::prelude::*;
use tracing::{debug, error, info, instrument, warn};

use trayport_core::config::AppConfig;
use trayport_core::error::{Result, TrayportError};
use trayport_core::types::{AUTO_TRAY, PAYLOAD_MIME_TYPE};

/// The only status token treated as success.
///
/// Matching is exact: a longer token that merely contains this one (for
/// example `successful-ok-ignored-or-substituted-attributes`) is a rejection.
pub const SUCCESS_TOKEN: &str = "successful-ok";

/// Printer attribute listing the input trays.
pub const MEDIA_SOURCE_SUPPORTED: &str = "media-source-supported";

/// Job attribute selecting the tray.
pub const MEDIA_ATTRIBUTE: &str = "media";

/// A Print-Job request before it is encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    pub requesting_user_name: String,
    pub job_name: String,
    pub document_format: String,
    /// Job-level attributes as `(name, keyword)` pairs.
    pub job_attributes: Vec<(String, String)>,
}

impl JobSubmission {
    /// Build the request for `tray_id`.
    ///
    /// `auto` omits the media attribute entirely so the printer picks a tray;
    /// any other value becomes exactly one `media` attribute.
    pub fn new(requesting_user_name: &str, job_name: &str, tray_id: &str) -> Self {
        let mut job_attributes = Vec::new();
        if tray_id != AUTO_TRAY {
            job_attributes.push((MEDIA_ATTRIBUTE.to_owned(), tray_id.to_owned()));
        }
        Self {
            requesting_user_name: requesting_user_name.to_owned(),
            job_name: job_name.to_owned(),
            document_format: PAYLOAD_MIME_TYPE.to_owned(),
            job_attributes,
        }
    }

    /// The requested tray, if any.
    pub fn media(&self) -> Option<&str> {
        self.job_attributes
            .iter()
            .find(|(name, _)| name == MEDIA_ATTRIBUTE)
            .map(|(_, value)| value.as_str())
    }
}

/// What the transport extracted from an IPP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IppReply {
    /// RFC 8011 status keyword, e.g. `successful-ok`.
    pub status_token: String,
    /// `job-id` from the Job Attributes group, when present.
    pub job_id: Option<i32>,
    /// Values of `media-source-supported`, always as a list.
    pub media_sources: Vec<String>,
}

/// Wire-level access to an IPP printer.
///
/// Implementations return [`TrayportError::Unreachable`] for transport
/// failures and an [`IppReply`] for anything the printer answered, whatever
/// its status.
#[async_trait]
pub trait IppTransport: Send + Sync {
    async fn get_media_sources(&self, uri: &str) -> Result<IppReply>;

    async fn print_job(
        &self,
        uri: &str,
        submission: &JobSubmission,
        document: Vec<u8>,
    ) -> Result<IppReply>;
}

/// Classify a status token. Pure: depends on nothing but `token`.
pub fn classify_status(token: &str) -> Result<()> {
    if token == SUCCESS_TOKEN {
        Ok(())
    } else {
        Err(TrayportError::RejectedByPrinter {
            token: token.to_owned(),
        })
    }
}

/// Adapter for the network printer configured in [`AppConfig`].
pub struct NetworkAdapter {
    uri: String,
    requesting_user_name: String,
    job_name: String,
    timeout: Duration,
    transport: Arc<dyn IppTransport>,
}

impl NetworkAdapter {
    pub fn new(config: &AppConfig, transport: Arc<dyn IppTransport>) -> Self {
        Self {
            uri: config.printer_url(),
            requesting_user_name: config.requesting_user_name.clone(),
            job_name: config.job_name.clone(),
            timeout: Duration::from_secs(config.submit_timeout_secs.max(1)),
            transport,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Ask the printer which input trays it has.
    ///
    /// Duplicates are dropped; order follows the printer's answer.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub async fn list_media_sources(&self) -> Result<Vec<String>> {
        let reply = self
            .with_timeout("Get-Printer-Attributes", self.transport.get_media_sources(&self.uri))
            .await?;
        classify_status(&reply.status_token)?;

        let mut sources: Vec<String> = Vec::with_capacity(reply.media_sources.len());
        for source in reply.media_sources {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        debug!(count = sources.len(), "media sources received");
        Ok(sources)
    }

    /// Submit `payload` to `tray_id` and return the printer's job id.
    ///
    /// Nothing is retried here.  A timeout only stops the wait: the printer
    /// may still print the job, so a caller that resubmits after a timeout can
    /// produce a duplicate.
    #[instrument(skip(self, payload), fields(uri = %self.uri, tray = %tray_id, bytes = payload.len()))]
    pub async fn submit(&self, payload: Vec<u8>, tray_id: &str) -> Result<Option<String>> {
        let submission = JobSubmission::new(&self.requesting_user_name, &self.job_name, tray_id);

        info!(url = %self.uri, tray = %tray_id, "sending Print-Job");
        debug!(?submission, "Print-Job attributes");

        let reply = self
            .with_timeout("Print-Job", self.transport.print_job(&self.uri, &submission, payload))
            .await?;

        if let Err(err) = classify_status(&reply.status_token) {
            error!(status = %reply.status_token, "Print-Job rejected");
            return Err(err);
        }

        match reply.job_id {
            Some(job_id) => {
                info!(job_id, "print job accepted by printer");
                Ok(Some(job_id.to_string()))
            }
            None => {
                warn!("printer accepted the job without returning a job-id");
                Ok(None)
            }
        }
    }

    async fn with_timeout<F>(&self, operation: &str, call: F) -> Result<IppReply>
    where
        F: std::future::Future<Output = Result<IppReply>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_secs = self.timeout.as_secs(),
                    "no answer from printer; it may still complete the request"
                );
                Err(TrayportError::Unreachable(format!(
                    "{operation} timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Production transport
// ---------------------------------------------------------------------------

/// [`IppTransport`] backed by the `ipp` crate's async client.
#[derive(Debug, Default, Clone, Copy)]
pub struct IppCrateTransport;

#[async_trait]
impl IppTransport for IppCrateTransport {
    async fn get_media_sources(&self, uri: &str) -> Result<IppReply> {
        let uri = parse_uri(uri)?;
        let operation = IppOperationBuilder::get_printer_attributes(uri.clone())
            .attributes(&[MEDIA_SOURCE_SUPPORTED])
            .build();
        let client = AsyncIppClient::new(uri);

        debug!("sending Get-Printer-Attributes");
        let response = client
            .send(operation)
            .await
            .map_err(|e| TrayportError::Unreachable(format!("Get-Printer-Attributes: {e}")))?;

        Ok(IppReply {
            status_token: status_token(response.header().operation_or_status),
            job_id: None,
            media_sources: extract_media_sources(response.attributes()),
        })
    }

    async fn print_job(
        &self,
        uri: &str,
        submission: &JobSubmission,
        document: Vec<u8>,
    ) -> Result<IppReply> {
        let uri = parse_uri(uri)?;
        let operation = build_print_job(uri.clone(), submission, document);
        let client = AsyncIppClient::new(uri);

        let response = client
            .send(operation)
            .await
            .map_err(|e| TrayportError::Unreachable(format!("Print-Job: {e}")))?;

        Ok(IppReply {
            status_token: status_token(response.header().operation_or_status),
            job_id: extract_job_id(response.attributes()),
            media_sources: Vec::new(),
        })
    }
}

fn parse_uri(uri: &str) -> Result<Uri> {
    uri.parse()
        .map_err(|e| TrayportError::Unreachable(format!("invalid printer URI '{uri}': {e}")))
}

/// Encode a [`JobSubmission`] as an `ipp` Print-Job operation.
fn build_print_job(uri: Uri, submission: &JobSubmission, document: Vec<u8>) -> impl IppOperation {
    let payload = IppPayload::new(Cursor::new(document));
    let mut builder = IppOperationBuilder::print_job(uri, payload)
        .user_name(&submission.requesting_user_name)
        .job_title(&submission.job_name)
        .document_format(&submission.document_format);
    for (name, value) in &submission.job_attributes {
        builder = builder.attribute(IppAttribute::new(name, IppValue::Keyword(value.as_str().into())));
    }
    builder.build()
}

/// Extract the `job-id` integer from a response's Job Attributes group.
fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    for group in attrs.groups_of(DelimiterTag::JobAttributes) {
        if let Some(attr) = group.attributes().get("job-id")
            && let IppValue::Integer(id) = attr.value()
        {
            return Some(*id);
        }
    }
    None
}

/// Collect `media-source-supported` from the Printer Attributes group.
fn extract_media_sources(attrs: &IppAttributes) -> Vec<String> {
    let mut sources = Vec::new();
    for group in attrs.groups_of(DelimiterTag::PrinterAttributes) {
        if let Some(attr) = group.attributes().get(MEDIA_SOURCE_SUPPORTED) {
            sources.extend(value_list(attr.value()));
        }
    }
    sources
}

/// A 1setOf attribute arrives as an array, a single value as a scalar.
fn value_list(value: &IppValue) -> Vec<String> {
    match value {
        IppValue::Array(items) => items.iter().map(|v| v.to_string()).collect(),
        other => vec![other.to_string()],
    }
}

/// Map a numeric IPP status code to its RFC 8011 keyword.
pub fn status_token(code: u16) -> String {
    let keyword = match code {
        0x0000 => "successful-ok",
        0x0001 => "successful-ok-ignored-or-substituted-attributes",
        0x0002 => "successful-ok-conflicting-attributes",
        0x0400 => "client-error-bad-request",
        0x0401 => "client-error-forbidden",
        0x0402 => "client-error-not-authenticated",
        0x0403 => "client-error-not-authorized",
        0x0404 => "client-error-not-possible",
        0x0405 => "client-error-timeout",
        0x0406 => "client-error-not-found",
        0x0407 => "client-error-gone",
        0x0408 => "client-error-request-entity-too-large",
        0x0409 => "client-error-request-value-too-long",
        0x040A => "client-error-document-format-not-supported",
        0x040B => "client-error-attributes-or-values-not-supported",
        0x040C => "client-error-uri-scheme-not-supported",
        0x040D => "client-error-charset-not-supported",
        0x040E => "client-error-conflicting-attributes",
        0x040F => "client-error-compression-not-supported",
        0x0410 => "client-error-compression-error",
        0x0411 => "client-error-document-format-error",
        0x0412 => "client-error-document-access-error",
        0x0500 => "server-error-internal-error",
        0x0501 => "server-error-operation-not-supported",
        0x0502 => "server-error-service-unavailable",
        0x0503 => "server-error-version-not-supported",
        0x0504 => "server-error-device-error",
        0x0505 => "server-error-temporary-error",
        0x0506 => "server-error-not-accepting-jobs",
        0x0507 => "server-error-busy",
        0x0508 => "server-error-job-canceled",
        0x0509 => "server-error-multiple-document-jobs-not-supported",
        other => return format!("unknown-status-0x{other:04x}"),
    };
    keyword.to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Printer that answers every request with a fixed status.
    struct SimulatedPrinter {
        token: String,
        job_id: Option<i32>,
        media_sources: Vec<String>,
        submissions: Mutex<Vec<JobSubmission>>,
    }

    impl SimulatedPrinter {
        fn answering(token: &str) -> Self {
            Self {
                token: token.into(),
                job_id: Some(17),
                media_sources: Vec::new(),
                submissions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IppTransport for SimulatedPrinter {
        async fn get_media_sources(&self, _uri: &str) -> Result<IppReply> {
            Ok(IppReply {
                status_token: self.token.clone(),
                job_id: None,
                media_sources: self.media_sources.clone(),
            })
        }

        async fn print_job(
            &self,
            _uri: &str,
            submission: &JobSubmission,
            _document: Vec<u8>,
        ) -> Result<IppReply> {
            self.submissions.lock().unwrap().push(submission.clone());
            Ok(IppReply {
                status_token: self.token.clone(),
                job_id: self.job_id,
                media_sources: Vec::new(),
            })
        }
    }

    /// Printer that never answers.
    struct SilentPrinter;

    #[async_trait]
    impl IppTransport for SilentPrinter {
        async fn get_media_sources(&self, _uri: &str) -> Result<IppReply> {
            std::future::pending().await
        }

        async fn print_job(&self, _: &str, _: &JobSubmission, _: Vec<u8>) -> Result<IppReply> {
            std::future::pending().await
        }
    }

    fn adapter(transport: Arc<dyn IppTransport>) -> NetworkAdapter {
        NetworkAdapter::new(&AppConfig::default(), transport)
    }

    #[test]
    fn auto_tray_sends_no_media_attribute() {
        let submission = JobSubmission::new("CRS-Service", "API-Print", "auto");
        assert!(submission.job_attributes.is_empty());
        assert_eq!(submission.media(), None);
    }

    #[test]
    fn explicit_tray_sends_exactly_one_media_attribute() {
        let submission = JobSubmission::new("CRS-Service", "API-Print", "tray-2");
        assert_eq!(
            submission.job_attributes,
            vec![("media".to_owned(), "tray-2".to_owned())]
        );
        assert_eq!(submission.document_format, "application/pdf");
    }

    #[test]
    fn encoded_request_omits_media_for_auto() {
        let uri: Uri = "http://192.168.1.50:631/ipp/print".parse().unwrap();
        let submission = JobSubmission::new("CRS-Service", "API-Print", "auto");
        let request = build_print_job(uri, &submission, b"%PDF".to_vec()).into_ipp_request();
        let has_media = request
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .any(|g| g.attributes().contains_key(MEDIA_ATTRIBUTE));
        assert!(!has_media);
    }

    #[test]
    fn encoded_request_carries_requested_tray() {
        let uri: Uri = "http://192.168.1.50:631/ipp/print".parse().unwrap();
        let submission = JobSubmission::new("CRS-Service", "API-Print", "tray-2");
        let request = build_print_job(uri, &submission, b"%PDF".to_vec()).into_ipp_request();
        let media: Vec<String> = request
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .filter_map(|g| g.attributes().get(MEDIA_ATTRIBUTE))
            .map(|a| a.value().to_string())
            .collect();
        assert_eq!(media, vec!["tray-2".to_owned()]);
    }

    #[test]
    fn exact_success_token_is_success() {
        assert!(classify_status("successful-ok").is_ok());
    }

    #[test]
    fn other_tokens_are_rejections() {
        for token in [
            "client-error-not-possible",
            "successful-ok-ignored-or-substituted-attributes",
            "server-error-busy",
        ] {
            match classify_status(token) {
                Err(TrayportError::RejectedByPrinter { token: t }) => assert_eq!(t, token),
                other => panic!("unexpected classification for {token}: {other:?}"),
            }
        }
    }

    #[test]
    fn status_codes_map_to_keywords() {
        assert_eq!(status_token(0x0000), "successful-ok");
        assert_eq!(status_token(0x0404), "client-error-not-possible");
        assert_eq!(status_token(0x0507), "server-error-busy");
        assert_eq!(status_token(0x7777), "unknown-status-0x7777");
    }

    #[test]
    fn scalar_media_source_becomes_one_element_list() {
        let scalar = IppValue::Keyword("tray-1".into());
        assert_eq!(value_list(&scalar), vec!["tray-1".to_owned()]);

        let array = IppValue::Array(vec![
            IppValue::Keyword("tray-1".into()),
            IppValue::Keyword("tray-2".into()),
        ]);
        assert_eq!(value_list(&array), vec!["tray-1".to_owned(), "tray-2".to_owned()]);
    }

    #[tokio::test]
    async fn submit_returns_printer_job_id() {
        let printer = Arc::new(SimulatedPrinter::answering("successful-ok"));
        let adapter = adapter(printer.clone());

        let job_id = adapter.submit(b"%PDF".to_vec(), "tray-1").await.unwrap();
        assert_eq!(job_id.as_deref(), Some("17"));

        let sent = printer.submissions.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].media(), Some("tray-1"));
    }

    #[tokio::test]
    async fn submit_surfaces_rejection_token() {
        let adapter = adapter(Arc::new(SimulatedPrinter::answering(
            "client-error-not-possible",
        )));
        let err = adapter.submit(b"%PDF".to_vec(), "auto").await.unwrap_err();
        assert!(matches!(
            err,
            TrayportError::RejectedByPrinter { ref token } if token == "client-error-not-possible"
        ));
    }

    #[tokio::test]
    async fn media_sources_are_deduplicated() {
        let mut printer = SimulatedPrinter::answering("successful-ok");
        printer.media_sources = vec!["tray-1".into(), "tray-2".into(), "tray-1".into()];
        let adapter = adapter(Arc::new(printer));

        let sources = adapter.list_media_sources().await.unwrap();
        assert_eq!(sources, vec!["tray-1".to_owned(), "tray-2".to_owned()]);
    }

    #[tokio::test]
    async fn silent_printer_times_out_as_unreachable() {
        let config = AppConfig {
            submit_timeout_secs: 1,
            ..Default::default()
        };
        let adapter = NetworkAdapter::new(&config, Arc::new(SilentPrinter));
        let err = adapter.submit(b"%PDF".to_vec(), "auto").await.unwrap_err();
        assert!(matches!(err, TrayportError::Unreachable(_)));
    }
}
