use super::*;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::transcript::THINKING_PLACEHOLDER;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Log(String),
    ClearLog,
    Append(Role, String, bool),
    Replace(String),
    Remove,
    Loading(bool),
    Panel(bool),
}

#[derive(Default)]
struct RecordingSurface {
    calls: Mutex<Vec<Call>>,
}

impl RecordingSurface {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|seen| *seen == call).count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().expect("calls").push(call);
    }
}

impl RenderSurface for RecordingSurface {
    fn append_log_entry(&self, markup: &str) {
        self.push(Call::Log(markup.to_string()));
    }

    fn clear_log(&self) {
        self.push(Call::ClearLog);
    }

    fn append_message(&self, message: &Message) {
        self.push(Call::Append(
            message.role,
            message.content.as_str().to_string(),
            message.is_pending,
        ));
    }

    fn replace_pending(&self, message: &Message) {
        self.push(Call::Replace(message.content.as_str().to_string()));
    }

    fn remove_pending(&self) {
        self.push(Call::Remove);
    }

    fn set_loading(&self, loading: bool) {
        self.push(Call::Loading(loading));
    }

    fn set_log_panel_expanded(&self, expanded: bool) {
        self.push(Call::Panel(expanded));
    }
}

struct ScriptedTransport {
    chunks: Mutex<Vec<Result<Bytes, TransportError>>>,
    hold_open: bool,
    ask_error: Option<TransportError>,
    upload_response: Option<UploadImageResponse>,
    requests: Mutex<Vec<AskRequest>>,
    uploads: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn streaming(chunks: Vec<&str>) -> Self {
        Self {
            chunks: Mutex::new(
                chunks
                    .into_iter()
                    .map(|chunk| Ok(Bytes::from(chunk.to_string())))
                    .collect(),
            ),
            hold_open: false,
            ask_error: None,
            upload_response: None,
            requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    fn failing(err: TransportError) -> Self {
        let mut transport = Self::streaming(Vec::new());
        transport.ask_error = Some(err);
        transport
    }

    fn with_read_error(self, err: TransportError) -> Self {
        self.chunks.lock().expect("chunks").push(Err(err));
        self
    }

    fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn with_upload_response(mut self, response: UploadImageResponse) -> Self {
        self.upload_response = Some(response);
        self
    }
}

#[async_trait]
impl AskTransport for ScriptedTransport {
    async fn ask(&self, request: &AskRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().expect("requests").push(request.clone());
        if let Some(err) = &self.ask_error {
            return Err(err.clone());
        }
        let chunks = std::mem::take(&mut *self.chunks.lock().expect("chunks"));
        let stream = futures::stream::iter(chunks);
        if self.hold_open {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn upload_image(
        &self,
        upload: ImageUpload,
    ) -> Result<UploadImageResponse, TransportError> {
        self.uploads
            .lock()
            .expect("uploads")
            .push(format!("{}:{}", upload.file_name, upload.mime_type));
        self.upload_response
            .clone()
            .ok_or_else(|| TransportError::Network("connection refused".to_string()))
    }
}

struct ChannelTransport {
    rx: Mutex<Option<mpsc::Receiver<Result<Bytes, TransportError>>>>,
}

#[async_trait]
impl AskTransport for ChannelTransport {
    async fn ask(&self, _request: &AskRequest) -> Result<ByteStream, TransportError> {
        let rx = self
            .rx
            .lock()
            .expect("rx")
            .take()
            .ok_or_else(|| TransportError::Network("stream already taken".to_string()))?;
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn upload_image(
        &self,
        _upload: ImageUpload,
    ) -> Result<UploadImageResponse, TransportError> {
        Err(TransportError::Network("not supported".to_string()))
    }
}

const LOG_FRAME: &str = "data: {\"type\":\"log_html\",\"content\":\"<div>hop 1</div>\"}\n\n";
const ANSWER_FRAME: &str = "data: {\"type\":\"answer\",\"content\":\"hi\"}\n\n";
const FINISHED_FRAME: &str = "data: {\"type\":\"finished\"}\n\n";

fn controller_with(
    transport: ScriptedTransport,
) -> (Arc<SessionController>, Arc<RecordingSurface>, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    let surface = Arc::new(RecordingSurface::default());
    let controller = SessionController::new(transport.clone(), surface.clone());
    (controller, surface, transport)
}

fn roles_and_text(controller: &SessionController) -> Vec<(Role, String, bool)> {
    controller
        .transcript()
        .into_iter()
        .map(|message| {
            (
                message.role,
                message.content.as_str().to_string(),
                message.is_pending,
            )
        })
        .collect()
}

#[tokio::test]
async fn answer_stream_resolves_placeholder_and_clears_loading() {
    let (controller, surface, transport) = controller_with(ScriptedTransport::streaming(vec![
        LOG_FRAME,
        "data: {\"type\":\"answer\",\"con",
        "tent\":\"**Allopurinol** lowers urate\"}\n",
        "\n",
        FINISHED_FRAME,
    ]));

    let options = SessionOptions {
        enable_multi_hop: false,
        search_budget: SearchBudget::Deep,
    };
    let report = controller
        .submit("  what treats gout?  ", options)
        .await
        .expect("submit");

    assert_eq!(report.outcome, SessionOutcome::Answered);
    assert_eq!(
        report.state,
        SessionState {
            active: false,
            log_panel_expanded: false,
            multi_hop_enabled: false,
            search_budget: SearchBudget::Deep,
        }
    );
    assert!(!controller.is_active());
    assert_eq!(
        roles_and_text(&controller),
        vec![
            (Role::User, "what treats gout?".to_string(), false),
            (
                Role::Assistant,
                "<strong>Allopurinol</strong> lowers urate".to_string(),
                false
            ),
        ]
    );
    assert_eq!(controller.log_entries(), vec!["<div>hop 1</div>".to_string()]);
    assert_eq!(
        surface.calls(),
        vec![
            Call::ClearLog,
            Call::Append(Role::User, "what treats gout?".to_string(), false),
            Call::Append(Role::Assistant, THINKING_PLACEHOLDER.to_string(), true),
            Call::Panel(true),
            Call::Loading(true),
            Call::Log("<div>hop 1</div>".to_string()),
            Call::Replace("<strong>Allopurinol</strong> lowers urate".to_string()),
            Call::Loading(false),
            Call::Panel(false),
        ]
    );

    let requests = transport.requests.lock().expect("requests").clone();
    assert_eq!(
        requests,
        vec![AskRequest {
            question: "what treats gout?".to_string(),
            enable_multi_hop: false,
            search_budget: SearchBudget::Deep,
        }]
    );
}

#[tokio::test]
async fn answer_frame_split_at_any_offset_yields_one_answer() {
    let frame = ANSWER_FRAME.as_bytes();
    for split in 1..frame.len() {
        let head = std::str::from_utf8(&frame[..split]).expect("ascii");
        let tail = std::str::from_utf8(&frame[split..]).expect("ascii");
        let (controller, _surface, _transport) = controller_with(ScriptedTransport::streaming(
            vec![head, tail, FINISHED_FRAME],
        ));

        let report = controller
            .submit("q", SessionOptions::default())
            .await
            .expect("submit");

        assert_eq!(report.outcome, SessionOutcome::Answered, "split at {split}");
        assert_eq!(
            roles_and_text(&controller),
            vec![
                (Role::User, "q".to_string(), false),
                (Role::Assistant, "hi".to_string(), false),
            ],
            "split at {split}"
        );
    }
}

#[tokio::test]
async fn second_answer_is_appended_as_new_message() {
    let (controller, surface, _transport) = controller_with(ScriptedTransport::streaming(vec![
        "data: {\"type\":\"answer\",\"content\":\"a\"}\n\ndata: {\"type\":\"answer\",\"content\":\"b\"}\n\n",
        FINISHED_FRAME,
    ]));

    controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    assert_eq!(
        roles_and_text(&controller),
        vec![
            (Role::User, "q".to_string(), false),
            (Role::Assistant, "a".to_string(), false),
            (Role::Assistant, "b".to_string(), false),
        ]
    );
    assert_eq!(surface.count(&Call::Replace("a".to_string())), 1);
    assert_eq!(
        surface.count(&Call::Append(Role::Assistant, "b".to_string(), false)),
        1
    );
}

#[tokio::test]
async fn finished_without_answer_removes_placeholder() {
    let (controller, surface, _transport) =
        controller_with(ScriptedTransport::streaming(vec![LOG_FRAME, FINISHED_FRAME]));

    let report = controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    assert_eq!(report.outcome, SessionOutcome::NoAnswer);
    assert_eq!(
        roles_and_text(&controller),
        vec![(Role::User, "q".to_string(), false)]
    );
    assert_eq!(surface.count(&Call::Remove), 1);
}

#[tokio::test]
async fn backend_error_event_ends_session_with_error_message() {
    let (controller, surface, _transport) = controller_with(ScriptedTransport::streaming(vec![
        LOG_FRAME,
        "data: {\"type\":\"error\",\"content\":\"An error occurred: graph offline\"}\n\n",
        ANSWER_FRAME,
        FINISHED_FRAME,
    ]));

    let report = controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    assert_eq!(
        report.outcome,
        SessionOutcome::BackendError("An error occurred: graph offline".to_string())
    );
    assert_eq!(
        roles_and_text(&controller),
        vec![
            (Role::User, "q".to_string(), false),
            (
                Role::Error,
                "System error: An error occurred: graph offline".to_string(),
                false
            ),
        ]
    );
    assert_eq!(surface.count(&Call::Loading(false)), 1);
    assert_eq!(surface.count(&Call::Panel(false)), 1);
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_ending_session() {
    let (controller, _surface, _transport) = controller_with(ScriptedTransport::streaming(vec![
        "data: {\"type\":\"progress\",\"content\":\"50%\"}\n\n",
        "data: {not json}\n\n",
        ": keep-alive\n\n",
        ANSWER_FRAME,
        FINISHED_FRAME,
    ]));

    let report = controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    assert_eq!(report.outcome, SessionOutcome::Answered);
    assert_eq!(controller.transcript().len(), 2);
}

#[tokio::test]
async fn truncated_stream_removes_placeholder_without_error_message() {
    let (controller, surface, _transport) = controller_with(ScriptedTransport::streaming(vec![
        LOG_FRAME,
        "data: {\"type\":\"answer\",\"content\":\"cut",
    ]));

    let report = controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    assert_eq!(report.outcome, SessionOutcome::Truncated);
    assert_eq!(
        roles_and_text(&controller),
        vec![(Role::User, "q".to_string(), false)]
    );
    assert_eq!(surface.count(&Call::Loading(false)), 1);
    assert!(!report.state.active);
}

#[tokio::test]
async fn rejected_request_appends_single_error_message() {
    let (controller, surface, _transport) =
        controller_with(ScriptedTransport::failing(TransportError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "neo4j unavailable".to_string(),
        }));

    let report = controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    let expected = "Error: 500 Internal Server Error. neo4j unavailable".to_string();
    assert_eq!(report.outcome, SessionOutcome::TransportFailed(expected.clone()));
    assert_eq!(
        roles_and_text(&controller),
        vec![
            (Role::User, "q".to_string(), false),
            (Role::Error, expected, false),
        ]
    );
    assert_eq!(surface.count(&Call::Loading(false)), 1);
    assert_eq!(surface.count(&Call::Remove), 1);
}

#[tokio::test]
async fn read_failure_mid_stream_is_a_transport_failure() {
    let transport = ScriptedTransport::streaming(vec![LOG_FRAME])
        .with_read_error(TransportError::Stream("connection reset".to_string()));
    let (controller, surface, _transport) = controller_with(transport);

    let report = controller
        .submit("q", SessionOptions::default())
        .await
        .expect("submit");

    assert_eq!(
        report.outcome,
        SessionOutcome::TransportFailed("Stream reading error: connection reset".to_string())
    );
    assert_eq!(controller.transcript().len(), 2);
    assert_eq!(controller.transcript()[1].role, Role::Error);
    assert_eq!(surface.count(&Call::Loading(false)), 1);
}

#[tokio::test]
async fn empty_question_is_rejected_without_side_effects() {
    let (controller, surface, transport) =
        controller_with(ScriptedTransport::streaming(vec![FINISHED_FRAME]));

    let err = controller
        .submit("   \n", SessionOptions::default())
        .await
        .expect_err("empty");

    assert_eq!(err, SessionError::EmptyQuestion);
    assert!(surface.calls().is_empty());
    assert!(transport.requests.lock().expect("requests").is_empty());
}

#[tokio::test]
async fn submission_while_active_is_rejected() {
    let (tx, rx) = mpsc::channel(4);
    let surface = Arc::new(RecordingSurface::default());
    let controller = SessionController::new(
        Arc::new(ChannelTransport {
            rx: Mutex::new(Some(rx)),
        }),
        surface.clone(),
    );

    let first = controller.submit("first", SessionOptions::default());
    let second = async {
        tokio::task::yield_now().await;
        let rejected = controller.submit("second", SessionOptions::default()).await;
        assert!(controller.is_active());
        tx.send(Ok(Bytes::from_static(
            b"data: {\"type\":\"answer\",\"content\":\"one\"}\n\ndata: {\"type\":\"finished\"}\n\n",
        )))
        .await
        .expect("send");
        rejected
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(second, Err(SessionError::SessionActive));
    assert_eq!(first.expect("first").outcome, SessionOutcome::Answered);
    assert_eq!(
        roles_and_text(&controller),
        vec![
            (Role::User, "first".to_string(), false),
            (Role::Assistant, "one".to_string(), false),
        ]
    );
    assert_eq!(surface.count(&Call::Loading(true)), 1);
    assert_eq!(surface.count(&Call::Loading(false)), 1);
}

#[tokio::test]
async fn upload_while_question_active_is_rejected() {
    let (tx, rx) = mpsc::channel(4);
    let surface = Arc::new(RecordingSurface::default());
    let controller = SessionController::new(
        Arc::new(ChannelTransport {
            rx: Mutex::new(Some(rx)),
        }),
        surface.clone(),
    );

    let question = controller.submit("first", SessionOptions::default());
    let uploads = async {
        tokio::task::yield_now().await;
        let calls_before = surface.calls().len();
        let supported = controller.upload_image(Path::new("scan.png")).await;
        let unsupported = controller.upload_image(Path::new("notes.pdf")).await;
        let new_calls = surface.calls().len() - calls_before;
        let pending = controller
            .transcript()
            .iter()
            .filter(|message| message.is_pending)
            .count();
        tx.send(Ok(Bytes::from_static(b"data: {\"type\":\"finished\"}\n\n")))
            .await
            .expect("send");
        (supported, unsupported, new_calls, pending)
    };
    let (question, (supported, unsupported, new_calls, pending)) = tokio::join!(question, uploads);

    assert_eq!(supported, Err(SessionError::SessionActive));
    assert_eq!(unsupported, Err(SessionError::SessionActive));
    assert_eq!(new_calls, 0);
    assert_eq!(pending, 1);
    assert_eq!(question.expect("question").outcome, SessionOutcome::NoAnswer);
    assert_eq!(
        roles_and_text(&controller),
        vec![(Role::User, "first".to_string(), false)]
    );
}

#[tokio::test]
async fn dropping_submit_future_releases_session() {
    let (controller, surface, _transport) =
        controller_with(ScriptedTransport::streaming(vec![LOG_FRAME]).held_open());

    let polled = controller
        .submit("q", SessionOptions::default())
        .now_or_never();
    assert!(polled.is_none());

    assert!(!controller.is_active());
    assert_eq!(controller.session_state(), None);
    assert_eq!(
        roles_and_text(&controller),
        vec![(Role::User, "q".to_string(), false)]
    );
    assert_eq!(controller.log_entries(), vec!["<div>hop 1</div>".to_string()]);
    assert_eq!(surface.count(&Call::Loading(false)), 1);
    assert_eq!(surface.count(&Call::Panel(false)), 1);
}

#[tokio::test]
async fn next_question_clears_previous_log() {
    let (controller, _surface, _transport) = controller_with(ScriptedTransport::streaming(vec![
        LOG_FRAME,
        ANSWER_FRAME,
        FINISHED_FRAME,
    ]));
    controller
        .submit("q1", SessionOptions::default())
        .await
        .expect("first");
    assert_eq!(controller.log_entries().len(), 1);

    // The scripted stream is exhausted, so the second session ends truncated.
    let report = controller
        .submit("q2", SessionOptions::default())
        .await
        .expect("second");
    assert_eq!(report.outcome, SessionOutcome::Truncated);
    assert!(controller.log_entries().is_empty());
    assert_eq!(controller.transcript().len(), 3);
}

fn temp_image(name: &str) -> std::path::PathBuf {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("kg_chat_session_test_{suffix}_{name}"))
}

#[tokio::test]
async fn unsupported_image_is_rejected_before_upload() {
    let (controller, _surface, transport) =
        controller_with(ScriptedTransport::streaming(Vec::new()));

    let outcome = controller
        .upload_image(Path::new("notes.pdf"))
        .await
        .expect("upload");

    assert_eq!(outcome, UploadOutcome::Rejected);
    assert!(transport.uploads.lock().expect("uploads").is_empty());
    assert_eq!(
        roles_and_text(&controller),
        vec![(Role::Error, UNSUPPORTED_IMAGE_MESSAGE.to_string(), false)]
    );
}

#[tokio::test]
async fn successful_upload_replaces_placeholder_with_results() {
    let path = temp_image("scan.png");
    tokio::fs::write(&path, b"\x89PNG fake").await.expect("write image");
    let transport = ScriptedTransport::streaming(Vec::new()).with_upload_response(
        UploadImageResponse {
            success: true,
            original_image: Some("http://localhost/uploads/scan.png".to_string()),
            segmented_image: Some("http://localhost/segmented/scan.png".to_string()),
            description: Some("Left *knee* joint".to_string()),
            ..UploadImageResponse::default()
        },
    );
    let (controller, surface, transport) = controller_with(transport);

    let outcome = controller.upload_image(&path).await.expect("upload");
    tokio::fs::remove_file(&path).await.expect("cleanup");

    assert_eq!(outcome, UploadOutcome::Completed);
    assert!(!controller.is_active());
    let uploads = transport.uploads.lock().expect("uploads").clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].ends_with("scan.png:image/png"));

    let messages = controller.transcript();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|message| !message.is_pending));
    assert_eq!(messages[0].role, Role::User);
    assert!(messages[0]
        .content
        .as_str()
        .contains("http://localhost/uploads/scan.png"));
    assert!(messages[1]
        .content
        .as_str()
        .contains("http://localhost/segmented/scan.png"));
    assert_eq!(messages[2].content.as_str(), "Left <em>knee</em> joint");
    assert_eq!(
        surface.calls()[0],
        Call::Append(Role::Assistant, UPLOAD_PLACEHOLDER.to_string(), true)
    );
    assert_eq!(surface.count(&Call::Remove), 1);
    assert_eq!(surface.count(&Call::Loading(false)), 0);
}

#[tokio::test]
async fn failed_upload_removes_placeholder_and_reports_error() {
    let path = temp_image("xray.jpg");
    tokio::fs::write(&path, b"jpeg").await.expect("write image");
    let transport = ScriptedTransport::streaming(Vec::new()).with_upload_response(
        UploadImageResponse {
            success: false,
            error: Some("model missing".to_string()),
            ..UploadImageResponse::default()
        },
    );
    let (controller, _surface, _transport) = controller_with(transport);

    let outcome = controller.upload_image(&path).await.expect("upload");
    tokio::fs::remove_file(&path).await.expect("cleanup");

    assert_eq!(
        outcome,
        UploadOutcome::Failed("model missing".to_string())
    );
    assert_eq!(
        roles_and_text(&controller),
        vec![(
            Role::Error,
            format!("Image segmentation failed: model missing<br>{SEGMENTATION_HINT}"),
            false
        )]
    );
}

#[tokio::test]
async fn missing_image_file_is_reported_in_transcript() {
    let (controller, _surface, transport) =
        controller_with(ScriptedTransport::streaming(Vec::new()));

    let outcome = controller
        .upload_image(&temp_image("missing.png"))
        .await
        .expect("upload");

    assert!(matches!(outcome, UploadOutcome::Failed(reason) if reason.starts_with("Failed to read image")));
    assert!(transport.uploads.lock().expect("uploads").is_empty());
    let messages = controller.transcript();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Error);
    assert!(messages[0]
        .content
        .as_str()
        .ends_with(&format!("<br>{UPLOAD_HINT}")));
}
