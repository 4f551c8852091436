//! End-to-end assessment scenarios over the SQLite ledger store.
//!
//! Each test wires resolver, synchronizer, engine and materializer the way
//! the app does, with a scripted reasoning service in place of the HTTP
//! client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use netguide_assessment::{
    AssessmentError, LedgerSynchronizer, Phase, ReasoningService, ReportMaterializer,
    SessionResolver, TurnEngine, TurnOutcome, TurnRequest, TurnStatus, TurnView,
};
use netguide_core::config::AssessmentConfig;
use netguide_core::store::LedgerStore;
use netguide_core::types::{ChatMessage, ChatRole, SessionStatus};
use netguide_storage::{Database, SqliteLedgerStore};

// =============================================================================
// Helpers
// =============================================================================

#[derive(Default)]
struct ScriptedService {
    replies: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<TurnRequest>>,
    report: Option<Value>,
    delay: Option<Duration>,
}

impl ScriptedService {
    fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn next_turn(&self, request: &TurnRequest) -> Result<Value, AssessmentError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AssessmentError::ServiceUnreachable("script exhausted".into()))
    }

    async fn fetch_report(&self, _session_id: Uuid) -> Result<Value, AssessmentError> {
        self.report
            .clone()
            .ok_or_else(|| AssessmentError::ServiceUnreachable("no report scripted".into()))
    }
}

struct Stack {
    store: Arc<dyn LedgerStore>,
    sync: Arc<LedgerSynchronizer>,
    resolver: SessionResolver,
    config: AssessmentConfig,
}

fn stack(db: Database, question_count: usize) -> Stack {
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::new(Arc::new(db)));
    let sync = Arc::new(LedgerSynchronizer::new(Arc::clone(&store), question_count));
    Stack {
        resolver: SessionResolver::new(Arc::clone(&store), Arc::clone(&sync)),
        store,
        sync,
        config: AssessmentConfig {
            question_count,
            ..AssessmentConfig::default()
        },
    }
}

impl Stack {
    fn engine(&self, session_id: Uuid, service: Arc<ScriptedService>) -> TurnEngine {
        TurnEngine::new(session_id, Arc::clone(&self.sync), service, self.config.clone())
    }
}

fn updated(outcome: TurnOutcome) -> TurnView {
    match outcome {
        TurnOutcome::Updated(view) => view,
        TurnOutcome::Dropped => panic!("operation was dropped"),
    }
}

fn done(summary: &str) -> Value {
    json!({
        "output": {
            "done": true,
            "analysis": { "summary": summary, "recommendations": ["short breaks"] }
        }
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_anonymous_session_runs_to_completion() {
    let s = stack(Database::in_memory().unwrap(), 2);
    let session = s.resolver.resolve(None).await.unwrap();
    let service = Arc::new(ScriptedService::new(vec![
        json!({"question": "Q1"}),
        json!({"question": "Q2"}),
        done("steady"),
    ]));
    let engine = s.engine(session.id, Arc::clone(&service));

    let seed = [ChatMessage::new(ChatRole::User, "My son struggles with reading")];
    let view = updated(engine.begin(&seed).await.unwrap());
    assert_eq!(view.pending_question.as_deref(), Some("Q1"));

    let view = updated(engine.submit_answer("Mornings are hard").await.unwrap());
    assert_eq!(view.pending_question.as_deref(), Some("Q2"));
    assert_eq!(view.progress(), 0.5);

    let view = updated(engine.submit_answer("Lists help").await.unwrap());
    assert!(view.is_completed());
    assert!(view.closing.is_some());
    assert_eq!(view.analysis.as_ref().unwrap()["summary"], "steady");

    let requests = service.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].status, TurnStatus::Done);
    assert_eq!(requests[2].assessment.len(), 2);
    assert_eq!(requests[2].chat, "User: My son struggles with reading");

    let transcript = s.store.get_transcript(session.id).await.unwrap().unwrap();
    assert_eq!(transcript.qna.len(), 2);
    assert_eq!(transcript.qna[1].question, "Q2");
    assert!(transcript.analysis.is_some());

    let result = s.store.get_result(session.id).await.unwrap().unwrap();
    assert_eq!(result.recommendations, Some(json!(["short breaks"])));

    let stored = s.store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);

    // A completed session is never reattached.
    let next = s.resolver.resolve(None).await.unwrap();
    assert_ne!(next.id, session.id);
}

#[tokio::test]
async fn test_restart_resumes_with_a_single_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("netguide.db");
    let owner = Some("parent@example.com");

    let session_id = {
        let s = stack(Database::new(&path).unwrap(), 3);
        let session = s.resolver.resolve(owner).await.unwrap();
        let service = Arc::new(ScriptedService::new(vec![
            json!({"question": "Q1"}),
            json!({"question": "Q2"}),
        ]));
        let engine = s.engine(session.id, service);
        engine.begin(&[]).await.unwrap();
        engine.submit_answer("first answer").await.unwrap();
        session.id
    };

    let s = stack(Database::new(&path).unwrap(), 3);
    let session = s.resolver.resolve(owner).await.unwrap();
    assert_eq!(session.id, session_id);

    let service = Arc::new(ScriptedService::new(vec![json!({"question": "Q2 again"})]));
    let engine = s.engine(session.id, Arc::clone(&service));
    let view = updated(engine.begin(&[]).await.unwrap());

    assert_eq!(view.answered.len(), 1);
    assert_eq!(view.pending_question.as_deref(), Some("Q2 again"));
    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].assessment[0].answer, "first answer");

    // A second begin with a question pending stays local.
    engine.begin(&[]).await.unwrap();
    assert_eq!(service.requests().len(), 1);
}

#[tokio::test]
async fn test_duplicate_submission_appends_once() {
    let s = stack(Database::in_memory().unwrap(), 3);
    let session = s.resolver.resolve(Some("dup")).await.unwrap();
    let service = Arc::new(ScriptedService {
        delay: Some(Duration::from_millis(50)),
        ..ScriptedService::new(vec![json!({"question": "Q1"}), json!({"question": "Q2"})])
    });
    let engine = s.engine(session.id, Arc::clone(&service));
    engine.begin(&[]).await.unwrap();

    let (a, b) = tokio::join!(engine.submit_answer("same"), engine.submit_answer("same"));
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.is_dropped()).count(), 1);

    let view = engine.view().await;
    assert_eq!(view.answered.len(), 1);
    assert_eq!(view.phase, Phase::AwaitingAnswer);
    let transcript = s.store.get_transcript(session.id).await.unwrap().unwrap();
    assert_eq!(transcript.qna.len(), 1);
    assert_eq!(service.requests().len(), 2);
}

#[tokio::test]
async fn test_fenced_question_list_yields_first_question() {
    let s = stack(Database::in_memory().unwrap(), 2);
    let session = s.resolver.resolve(None).await.unwrap();
    let service = Arc::new(ScriptedService::new(vec![json!({
        "output": "```json\n[\"Q1\", \"Q2\"]\n```"
    })]));
    let engine = s.engine(session.id, service);

    let view = updated(engine.begin(&[]).await.unwrap());
    assert_eq!(view.pending_question.as_deref(), Some("Q1"));
}

#[tokio::test]
async fn test_completion_from_two_devices_records_one_result() {
    let s = stack(Database::in_memory().unwrap(), 1);
    let session = s.resolver.resolve(Some("shared")).await.unwrap();

    let first = s.engine(
        session.id,
        Arc::new(ScriptedService::new(vec![json!({"question": "Q1"}), done("first")])),
    );
    let second = s.engine(
        session.id,
        Arc::new(ScriptedService::new(vec![json!({"question": "Q1"}), done("second")])),
    );

    first.begin(&[]).await.unwrap();
    second.begin(&[]).await.unwrap();
    assert!(updated(first.submit_answer("from phone").await.unwrap()).is_completed());
    let err = second.submit_answer("from laptop").await.unwrap_err();
    assert!(matches!(err, AssessmentError::SessionClosed { .. }));
    assert!(!second.view().await.retry_required);

    let result = s.store.get_result(session.id).await.unwrap().unwrap();
    assert_eq!(result.result["summary"], "first");
    let transcript = s.store.get_transcript(session.id).await.unwrap().unwrap();
    assert_eq!(transcript.qna.len(), 1);
    assert_eq!(transcript.qna[0].answer, "from phone");
    assert_eq!(transcript.analysis.unwrap()["summary"], "first");

    // The second device picks up the recorded outcome on reload.
    let view = updated(second.begin(&[]).await.unwrap());
    assert!(view.is_completed());
    assert_eq!(view.answered[0].answer, "from phone");
}

#[tokio::test]
async fn test_report_of_completed_session_is_sanitized() {
    let s = stack(Database::in_memory().unwrap(), 1);
    let session = s.resolver.resolve(Some("report")).await.unwrap();
    let service = Arc::new(ScriptedService {
        report: Some(json!({
            "output": {
                "html": "<!DOCTYPE html><html><head><style>h1{color:red}</style></head>\
                         <body><h1>Profile</h1><style>p{}</style><p>Strengths</p></body></html>"
            }
        })),
        ..ScriptedService::new(vec![json!({"question": "Q1"}), done("ok")])
    });
    let engine = s.engine(session.id, Arc::clone(&service));
    let materializer = ReportMaterializer::new(Arc::clone(&s.sync), service);

    engine.begin(&[]).await.unwrap();
    let err = materializer.materialize(session.id).await.unwrap_err();
    assert!(matches!(err, AssessmentError::SessionIncomplete(_)));

    engine.submit_answer("answer").await.unwrap();
    let markup = materializer.materialize(session.id).await.unwrap();
    assert_eq!(markup.as_str(), "<h1>Profile</h1><p>Strengths</p>");
    assert!(!markup.to_document("Report").contains("color:red"));
}

#[tokio::test]
async fn test_abandoned_session_is_replaced() {
    let s = stack(Database::in_memory().unwrap(), 2);
    let session = s.resolver.resolve(Some("restart")).await.unwrap();
    assert!(s.resolver.abandon(session.id).await.unwrap());

    let engine = s.engine(session.id, Arc::new(ScriptedService::new(vec![])));
    let err = engine.begin(&[]).await.unwrap_err();
    assert!(matches!(err, AssessmentError::InvalidTransition(_, _)));

    let fresh = s.resolver.resolve(Some("restart")).await.unwrap();
    assert_ne!(fresh.id, session.id);
    let history = s.resolver.history(Some("restart"), 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, fresh.id);
}
