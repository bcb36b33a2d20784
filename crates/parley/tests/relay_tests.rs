//! End-to-end relay behavior against a scripted in-process provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use parley::chat::ChatRepository;
use parley::db::Database;
use parley::delivery::{DeliveryChannel, Mailbox, StreamSignal};
use parley::llm::{
    CompletionProvider, DeltaChunk, DeltaStream, GenerationParams, ProviderError, ProviderRegistry,
};
use parley::prompt::{NewPrompt, PromptRepository};
use parley::relay::{Relay, RelayConfig, RelayError, TurnRequest};
use parley::session::{Role, SessionStore, Turn};
use parley::ws::{RelayHub, WsEvent};

const MODEL: &str = "scripted-model";

/// Provider that replays a fixed script of deltas for every call.
struct ScriptedProvider {
    models: Vec<String>,
    script: Vec<Result<DeltaChunk, ProviderError>>,
    /// Pause before each script item, to keep a stream open long
    /// enough for concurrency assertions.
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<DeltaChunk, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            models: vec![MODEL.to_string()],
            script,
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn with_delay(script: Vec<Result<DeltaChunk, ProviderError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            models: vec![MODEL.to_string()],
            script,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn vendor(&self) -> &'static str {
        "scripted"
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn stream_completion(
        &self,
        _model: &str,
        _turns: &[Turn],
        _params: &GenerationParams,
    ) -> Result<DeltaStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for item in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn text(s: &str) -> Result<DeltaChunk, ProviderError> {
    Ok(DeltaChunk::Text(s.to_string()))
}

fn end() -> Result<DeltaChunk, ProviderError> {
    Ok(DeltaChunk::End { token_count: None })
}

struct Fixture {
    relay: Arc<Relay>,
    store: Arc<SessionStore>,
    chats: ChatRepository,
    mailbox: Arc<Mailbox>,
    prompt_id: i64,
}

/// Wire a relay around the scripted provider, a fresh in-memory
/// database, and pull-mode delivery.
async fn fixture(provider: Arc<ScriptedProvider>) -> Fixture {
    fixture_with_timeout(provider, Duration::from_secs(5)).await
}

async fn fixture_with_timeout(
    provider: Arc<ScriptedProvider>,
    first_delta_timeout: Duration,
) -> Fixture {
    let db = Database::in_memory().await.unwrap();
    let prompts = PromptRepository::new(db.clone());
    let chats = ChatRepository::new(db.clone());
    let prompt = prompts
        .create(NewPrompt {
            title: "Helpful".to_string(),
            text: "You are a helpful assistant.".to_string(),
        })
        .await
        .unwrap();

    let store = Arc::new(SessionStore::new());
    let mailbox = Arc::new(Mailbox::new());
    let registry = Arc::new(ProviderRegistry::new(vec![
        provider as Arc<dyn CompletionProvider>,
    ]));

    let relay = Arc::new(Relay::new(
        store.clone(),
        prompts,
        chats.clone(),
        registry,
        mailbox.clone(),
        RelayConfig {
            first_delta_timeout,
            ..RelayConfig::default()
        },
    ));

    Fixture {
        relay,
        store,
        chats,
        mailbox,
        prompt_id: prompt.id,
    }
}

impl Fixture {
    fn request(&self, session_id: &str, question: &str) -> TurnRequest {
        TurnRequest {
            session_id: session_id.to_string(),
            prompt_id: self.prompt_id,
            model: MODEL.to_string(),
            question: question.to_string(),
        }
    }

    /// Poll the mailbox until a terminal signal arrives, returning
    /// everything delivered for the session.
    async fn collect_stream(&self, session_id: &str) -> Vec<StreamSignal> {
        let mut signals = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                signals.extend(self.mailbox.drain(session_id).await);
                if signals.iter().any(StreamSignal::is_terminal) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream did not terminate in time");
        signals
    }

    async fn wait_idle(&self, session_id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.relay.is_busy(session_id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session stayed busy");
    }
}

#[tokio::test]
async fn chunks_accumulate_into_one_persisted_answer() {
    let fx = fixture(ScriptedProvider::new(vec![text("Hel"), text("lo"), end()])).await;

    let accepted = fx
        .relay
        .submit_turn(fx.request("s1", "Say hello"))
        .await
        .unwrap();

    let signals = fx.collect_stream("s1").await;
    assert_eq!(
        signals,
        vec![
            StreamSignal::Chunk {
                text: "Hel".to_string()
            },
            StreamSignal::Chunk {
                text: "lo".to_string()
            },
            StreamSignal::End { token_count: None },
        ]
    );

    fx.wait_idle("s1").await;

    let messages = fx.chats.list_messages(accepted.chat_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].kind, "question");
    assert_eq!(messages[0].content, "Say hello");
    assert_eq!(messages[1].kind, "answer");
    assert_eq!(messages[1].content, "Hello");

    let turns = fx.store.snapshot("s1").unwrap();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].role, Role::System);
    assert_eq!(turns[1], Turn::user("Say hello"));
    assert_eq!(turns[2], Turn::assistant("Hello"));
}

#[tokio::test]
async fn provider_failure_keeps_delivered_chunks_but_commits_nothing() {
    let fx = fixture(ScriptedProvider::new(vec![
        text("Hel"),
        Err(ProviderError::upstream("scripted", "connection lost")),
    ]))
    .await;

    let accepted = fx
        .relay
        .submit_turn(fx.request("s1", "Say hello"))
        .await
        .unwrap();

    let signals = fx.collect_stream("s1").await;
    assert_eq!(signals.len(), 2);
    assert_eq!(
        signals[0],
        StreamSignal::Chunk {
            text: "Hel".to_string()
        }
    );
    assert!(matches!(signals[1], StreamSignal::Error { .. }));

    fx.wait_idle("s1").await;

    // Only the question is persisted.
    let messages = fx.chats.list_messages(accepted.chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, "question");

    // The context holds the user turn and no partial assistant turn.
    let turns = fx.store.snapshot("s1").unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1], Turn::user("Say hello"));
}

#[tokio::test]
async fn second_turn_while_streaming_is_rejected() {
    let provider = ScriptedProvider::with_delay(
        vec![text("slow"), text(" answer"), end()],
        Duration::from_millis(40),
    );
    let fx = fixture(provider.clone()).await;

    fx.relay
        .submit_turn(fx.request("s1", "first"))
        .await
        .unwrap();

    let rejected = fx.relay.submit_turn(fx.request("s1", "second")).await;
    assert!(matches!(rejected, Err(RelayError::SessionBusy(_))));

    let signals = fx.collect_stream("s1").await;
    fx.wait_idle("s1").await;

    // Only the accepted turn's chunks appear on the channel, in order.
    assert_eq!(
        signals,
        vec![
            StreamSignal::Chunk {
                text: "slow".to_string()
            },
            StreamSignal::Chunk {
                text: " answer".to_string()
            },
            StreamSignal::End { token_count: None },
        ]
    );
    assert_eq!(provider.calls(), 1);

    // The session accepts a new turn once idle again.
    fx.relay
        .submit_turn(fx.request("s1", "third"))
        .await
        .unwrap();
    fx.collect_stream("s1").await;
    fx.wait_idle("s1").await;
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn reset_then_ask_creates_a_new_chat() {
    let fx = fixture(ScriptedProvider::new(vec![text("answer one"), end()])).await;

    let first = fx
        .relay
        .submit_turn(fx.request("s1", "first question"))
        .await
        .unwrap();
    fx.collect_stream("s1").await;
    fx.wait_idle("s1").await;

    fx.relay.reset("s1");
    assert!(fx.store.snapshot("s1").is_none());

    let second = fx
        .relay
        .submit_turn(fx.request("s1", "second question"))
        .await
        .unwrap();
    fx.collect_stream("s1").await;
    fx.wait_idle("s1").await;

    assert_ne!(first.chat_id, second.chat_id);
    assert_eq!(fx.chats.list_chats().await.unwrap().len(), 2);

    // The old chat kept its rows; the new one starts fresh.
    assert_eq!(fx.chats.count_messages(first.chat_id).await.unwrap(), 2);
    assert_eq!(fx.chats.count_messages(second.chat_id).await.unwrap(), 2);
}

#[tokio::test]
async fn empty_question_has_no_side_effects() {
    let provider = ScriptedProvider::new(vec![text("never"), end()]);
    let fx = fixture(provider.clone()).await;

    let rejected = fx.relay.submit_turn(fx.request("s1", "   ")).await;
    assert!(matches!(rejected, Err(RelayError::InvalidInput)));

    assert_eq!(provider.calls(), 0);
    assert!(fx.chats.list_chats().await.unwrap().is_empty());
    assert!(fx.store.snapshot("s1").is_none());
    assert!(!fx.relay.is_busy("s1"));
}

#[tokio::test]
async fn unknown_model_and_prompt_are_rejected_before_side_effects() {
    let provider = ScriptedProvider::new(vec![text("never"), end()]);
    let fx = fixture(provider.clone()).await;

    let mut request = fx.request("s1", "hello");
    request.model = "no-such-model".to_string();
    let rejected = fx.relay.submit_turn(request).await;
    assert!(matches!(rejected, Err(RelayError::UnknownModel(_))));

    let mut request = fx.request("s1", "hello");
    request.prompt_id = 9999;
    let rejected = fx.relay.submit_turn(request).await;
    assert!(matches!(rejected, Err(RelayError::PromptNotFound(9999))));

    assert_eq!(provider.calls(), 0);
    assert!(fx.chats.list_chats().await.unwrap().is_empty());
    assert!(fx.store.snapshot("s1").is_none());
}

#[tokio::test]
async fn concurrent_sessions_never_see_each_others_chunks() {
    let fx = fixture(ScriptedProvider::new(vec![
        text("shared"),
        text(" script"),
        end(),
    ]))
    .await;

    let (a, b) = tokio::join!(
        fx.relay.submit_turn(fx.request("session-a", "from a")),
        fx.relay.submit_turn(fx.request("session-b", "from b")),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_ne!(a.chat_id, b.chat_id);

    let (signals_a, signals_b) =
        tokio::join!(fx.collect_stream("session-a"), fx.collect_stream("session-b"));

    for signals in [&signals_a, &signals_b] {
        assert_eq!(
            signals,
            &vec![
                StreamSignal::Chunk {
                    text: "shared".to_string()
                },
                StreamSignal::Chunk {
                    text: " script".to_string()
                },
                StreamSignal::End { token_count: None },
            ]
        );
    }

    fx.wait_idle("session-a").await;
    fx.wait_idle("session-b").await;

    let turns_a = fx.store.snapshot("session-a").unwrap();
    let turns_b = fx.store.snapshot("session-b").unwrap();
    assert_eq!(turns_a[1], Turn::user("from a"));
    assert_eq!(turns_b[1], Turn::user("from b"));
}

#[tokio::test]
async fn context_grows_across_turns_with_single_system_turn() {
    let fx = fixture(ScriptedProvider::new(vec![text("answer"), end()])).await;

    for question in ["one", "two"] {
        fx.relay
            .submit_turn(fx.request("s1", question))
            .await
            .unwrap();
        fx.collect_stream("s1").await;
        fx.wait_idle("s1").await;
    }

    let turns = fx.store.snapshot("s1").unwrap();
    assert_eq!(turns.len(), 5);
    let system_count = turns.iter().filter(|t| t.role == Role::System).count();
    assert_eq!(system_count, 1);
    assert_eq!(turns[0].role, Role::System);

    // Both turns landed in the same chat.
    assert_eq!(fx.chats.list_chats().await.unwrap().len(), 1);
    let chat_id = fx.store.chat_id("s1").unwrap();
    assert_eq!(fx.chats.count_messages(chat_id).await.unwrap(), 4);
}

#[tokio::test]
async fn silent_provider_times_out() {
    let provider = ScriptedProvider::with_delay(
        vec![text("too"), text(" late"), end()],
        Duration::from_secs(30),
    );
    let fx = fixture_with_timeout(provider, Duration::from_millis(50)).await;

    let accepted = fx
        .relay
        .submit_turn(fx.request("s1", "anyone there?"))
        .await
        .unwrap();

    let signals = fx.collect_stream("s1").await;
    assert_eq!(signals.len(), 1);
    assert!(matches!(signals[0], StreamSignal::Error { .. }));

    fx.wait_idle("s1").await;
    let messages = fx.chats.list_messages(accepted.chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, "question");
}

#[tokio::test]
async fn empty_answer_is_not_recorded() {
    let fx = fixture(ScriptedProvider::new(vec![end()])).await;

    let accepted = fx
        .relay
        .submit_turn(fx.request("s1", "say nothing"))
        .await
        .unwrap();

    let signals = fx.collect_stream("s1").await;
    assert_eq!(signals, vec![StreamSignal::End { token_count: None }]);

    fx.wait_idle("s1").await;

    let messages = fx.chats.list_messages(accepted.chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    let turns = fx.store.snapshot("s1").unwrap();
    assert_eq!(turns.len(), 2);
}

#[tokio::test]
async fn push_mode_delivers_ws_events_in_order() {
    // Same relay wiring, but publishing through the websocket hub.
    let db = Database::in_memory().await.unwrap();
    let prompts = PromptRepository::new(db.clone());
    let chats = ChatRepository::new(db.clone());
    let prompt = prompts
        .create(NewPrompt {
            title: "Helpful".to_string(),
            text: "You are a helpful assistant.".to_string(),
        })
        .await
        .unwrap();

    let store = Arc::new(SessionStore::new());
    let hub = Arc::new(RelayHub::new());
    let provider = ScriptedProvider::new(vec![text("Hel"), text("lo"), end()]);
    let registry = Arc::new(ProviderRegistry::new(vec![
        provider as Arc<dyn CompletionProvider>,
    ]));
    let relay = Arc::new(Relay::new(
        store,
        prompts,
        chats,
        registry,
        hub.clone() as Arc<dyn DeliveryChannel>,
        RelayConfig::default(),
    ));

    let (mut rx, _conn_id) = hub.register("s1");

    relay
        .submit_turn(TurnRequest {
            session_id: "s1".to_string(),
            prompt_id: prompt.id,
            model: MODEL.to_string(),
            question: "Say hello".to_string(),
        })
        .await
        .unwrap();

    let mut answer = String::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stream stalled")
            .expect("hub closed");
        match event {
            WsEvent::Chunk { text, session_id } => {
                assert_eq!(session_id, "s1");
                answer.push_str(&text);
            }
            WsEvent::End { session_id, .. } => {
                assert_eq!(session_id, "s1");
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(answer, "Hello");
}
