//! Conversation engine
//!
//! The single entry point callers use. `handle` checks a message against
//! the guards, checks the conversation out of the state manager (resuming,
//! restoring or beginning it), runs the orchestrator and applies the stage
//! changes the reply asks for. It always returns a well-formed reply.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, GuardConfig};
use crate::conversation::loan::{MAX_AMOUNT, MAX_TENURE_MONTHS, MIN_AMOUNT, MIN_TENURE_MONTHS};
use crate::conversation::{Amendment, Context, Reply, Stage};
use crate::error::{LoanflowError, Result};
use crate::orchestrator::Orchestrator;
use crate::responder::extract::{self, contains_phrase, words};
use crate::responder::{ResponderKind, ResponderSet};
use crate::router::Router;
use crate::services::{ConversationStore, CreditLookup, IdentityLookup};
use crate::state::{StateManager, SweepReport};
use crate::underwriting::format_rupees;

/// Exit and help keywords only count in messages this short
const COMMAND_MAX_WORDS: usize = 4;

type TurnLock = Arc<tokio::sync::Mutex<()>>;

pub struct LoanEngine {
    state: Arc<StateManager>,
    router: Arc<Router>,
    orchestrator: Orchestrator,
    store: Arc<dyn ConversationStore>,
    guards: GuardConfig,
    turns: Mutex<HashMap<String, TurnLock>>,
}

impl LoanEngine {
    pub fn new(
        config: &EngineConfig,
        identity: Arc<dyn IdentityLookup>,
        credit: Arc<dyn CreditLookup>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        let responders = ResponderSet::new(identity, credit.clone(), config.underwriting.clone());
        Self::with_responders(config, responders, credit, store)
    }

    /// Build around an explicit responder set
    pub fn with_responders(
        config: &EngineConfig,
        responders: ResponderSet,
        credit: Arc<dyn CreditLookup>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(
            config,
            Arc::new(StateManager::new(config.state.clone())),
            responders,
            credit,
            store,
        ))
    }

    /// Build around an existing state manager, e.g. one driven by a manual clock
    pub fn with_state(
        config: &EngineConfig,
        state: Arc<StateManager>,
        responders: ResponderSet,
        credit: Arc<dyn CreditLookup>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, state, responders, credit, store))
    }

    fn assemble(
        config: &EngineConfig,
        state: Arc<StateManager>,
        responders: ResponderSet,
        credit: Arc<dyn CreditLookup>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let router = Arc::new(Router::new(responders, &config.router));
        let orchestrator = Orchestrator::new(router.clone(), credit, config.orchestrator.clone());
        Self {
            state,
            router,
            orchestrator,
            store,
            guards: config.engine.clone(),
            turns: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    fn turn_lock(&self, id: &str) -> TurnLock {
        self.turns
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn current_stage(&self, id: &str) -> Stage {
        self.state.get(id).map(|c| c.stage()).unwrap_or(Stage::Greeting)
    }

    /// Handle one inbound message for conversation `id`
    pub async fn handle(&self, id: &str, message: &str) -> Reply {
        let message = message.trim();
        if let Some(reply) = self.screen(id, message) {
            return reply;
        }

        let lock = self.turn_lock(id);
        let _turn = lock.lock().await;

        let mut ctx = match self.checkout(id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(conversation = id, error = %e, "checkout failed");
                return Reply::new(e.user_message(), Stage::Greeting).with_error(e.to_string());
            }
        };
        ctx.push_user(message, self.state.now());

        if is_command(message, &self.guards.help_keywords) {
            let reply = help_reply(ctx.stage());
            return self.finish(ctx, reply, None).await;
        }
        if is_command(message, &self.guards.exit_keywords) {
            return self.farewell(ctx).await;
        }

        let mut note = None;
        if let Some(amendments) = corrections(message, &ctx) {
            match self.amend(&ctx, &amendments) {
                Ok((amended, text)) => {
                    ctx = amended;
                    note = Some(text);
                }
                Err(e) => {
                    let reply = Reply::new(e.user_message(), ctx.stage()).with_error(e.to_string());
                    return self.finish(ctx, reply, None).await;
                }
            }
        }

        let mut reply = self.orchestrator.run(message, &mut ctx).await;
        if let Some(note) = note {
            reply.text = format!("{}\n\n{}", note, reply.text);
        }
        let responder = reply
            .metadata
            .get("responder")
            .and_then(|v| serde_json::from_value::<ResponderKind>(v.clone()).ok());
        self.finish(ctx, reply, responder).await
    }

    /// Guards that need no conversation state
    fn screen(&self, id: &str, message: &str) -> Option<Reply> {
        let stage = self.current_stage(id);
        if message.is_empty() {
            return Some(
                Reply::new("I didn't catch that. Could you type your message again?", stage)
                    .with_error(LoanflowError::validation("empty message").to_string()),
            );
        }
        let chars = message.chars().count();
        if chars > self.guards.max_message_chars {
            return Some(
                Reply::new(
                    format!(
                        "That message is a bit long. Please keep it under {} characters.",
                        self.guards.max_message_chars
                    ),
                    stage,
                )
                .with_error(
                    LoanflowError::validation(format!("message has {} characters", chars)).to_string(),
                ),
            );
        }
        if contains_phrase(message, &self.guards.blocked_terms) {
            info!(conversation = id, "message refused by content guard");
            return Some(
                Reply::new(
                    "I'm here to help with your loan application. Let's keep the conversation \
                     respectful so I can assist you.",
                    stage,
                )
                .with_error("blocked content"),
            );
        }
        None
    }

    /// Active, paused, persisted or new, in that order
    async fn checkout(&self, id: &str) -> Result<Context> {
        if let Some(ctx) = self.state.get(id) {
            return Ok(ctx);
        }
        if self.state.is_paused(id) {
            match self.state.resume(id) {
                Ok(ctx) => return Ok(ctx),
                Err(LoanflowError::NotFound { .. }) => {
                    debug!(conversation = id, "paused conversation expired; starting over");
                    return self.state.begin(id);
                }
                Err(e) => return Err(e),
            }
        }
        match self.store.load(id).await {
            Ok(Some(ctx)) => {
                self.state.restore(ctx)?;
                return self.state.get(id).ok_or_else(|| LoanflowError::not_found(id));
            }
            Ok(None) => {}
            Err(e) => warn!(conversation = id, error = %e, "load failed; starting fresh"),
        }
        self.state.begin(id)
    }

    /// Commit the working context and apply requested transitions in order,
    /// stopping at the first denial
    async fn finish(&self, mut ctx: Context, mut reply: Reply, responder: Option<ResponderKind>) -> Reply {
        ctx.push_assistant(reply.text.clone(), responder, self.state.now());
        if let Err(e) = self.state.commit(&ctx) {
            warn!(conversation = %ctx.id, error = %e, "commit failed");
            return Reply::new(e.user_message(), ctx.stage()).with_error(e.to_string());
        }

        for request in reply.transitions.clone() {
            match self.state.transition(&ctx.id, request.target, request.kind) {
                Ok(outcome) if outcome.applied => self.persist(&ctx.id).await,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        conversation = %ctx.id,
                        target = %request.target,
                        error = %e,
                        "transition denied"
                    );
                    reply = reply.with_meta(
                        "transition_denied",
                        json!({ "target": request.target, "reason": e.to_string() }),
                    );
                    break;
                }
            }
        }

        reply.stage = self.current_stage(&ctx.id);
        reply
    }

    async fn persist(&self, id: &str) {
        let Some(ctx) = self.state.get(id) else {
            return;
        };
        if let Err(e) = self.store.save(&ctx).await {
            warn!(conversation = id, error = %e, "persisting conversation failed");
        }
    }

    async fn farewell(&self, mut ctx: Context) -> Reply {
        let stage = ctx.stage();
        let reply = Reply::new(
            "Thanks for chatting with us. Your progress is saved, so just send a message \
             whenever you'd like to continue.",
            stage,
        )
        .no_input_needed();
        ctx.push_assistant(reply.text.clone(), None, self.state.now());

        if let Err(e) = self.state.commit(&ctx) {
            warn!(conversation = %ctx.id, error = %e, "commit failed");
        }
        if let Err(e) = self.store.save(&ctx).await {
            warn!(conversation = %ctx.id, error = %e, "persisting conversation failed");
        }
        if let Err(e) = self.state.pause(&ctx.id, "user exit") {
            warn!(conversation = %ctx.id, error = %e, "pause failed");
        }
        reply
    }

    /// Record the working copy, then apply each amendment through the state manager
    fn amend(&self, ctx: &Context, amendments: &[Amendment]) -> Result<(Context, String)> {
        self.state.commit(ctx)?;
        let mut latest = ctx.clone();
        for amendment in amendments {
            latest = self.state.amend(&ctx.id, *amendment)?;
        }
        let changes: Vec<String> = amendments.iter().map(|a| a.describe()).collect();
        Ok((latest, format!("Done, I've updated your {}.", changes.join(" and "))))
    }

    /// Drop a conversation from memory along with its turn lock. Whatever
    /// was persisted stays in the store.
    pub fn end(&self, id: &str) -> Option<Context> {
        let ended = self.state.end(id);
        self.turns.lock().remove(id);
        if ended.is_some() {
            debug!(conversation = id, "conversation ended");
        }
        ended
    }

    /// Evict idle and expired conversations, persisting the abandoned ones
    pub async fn sweep(&self) -> SweepReport {
        let report = self.state.sweep();
        for ctx in &report.abandoned {
            if let Err(e) = self.store.save(ctx).await {
                warn!(conversation = %ctx.id, error = %e, "persisting abandoned conversation failed");
            }
        }
        let mut turns = self.turns.lock();
        for id in report
            .abandoned
            .iter()
            .map(|c| c.id.as_str())
            .chain(report.expired.iter().map(String::as_str))
        {
            turns.remove(id);
        }
        report
    }
}

fn is_command(message: &str, keywords: &[String]) -> bool {
    words(message).count() <= COMMAND_MAX_WORDS && contains_phrase(message, keywords)
}

/// Field changes carried by correction phrasing on a confirmed loan
fn corrections(message: &str, ctx: &Context) -> Option<Vec<Amendment>> {
    if ctx.loan.is_none() || !extract::is_correction(message) {
        return None;
    }
    let mut amendments = Vec::new();
    if let Some(amount) = extract::extract_amount(message) {
        amendments.push(Amendment::Amount(amount));
    }
    if let Some(months) = extract::extract_tenure(message) {
        amendments.push(Amendment::Tenure(months));
    }
    if let Some(purpose) = extract::extract_purpose(message) {
        amendments.push(Amendment::Purpose(purpose));
    }
    (!amendments.is_empty()).then_some(amendments)
}

fn help_reply(stage: Stage) -> Reply {
    let text = match stage {
        Stage::Greeting | Stage::Requirements => format!(
            "Tell me how much you'd like to borrow (₹{} to ₹{}), for how many months \
             ({} to {}), what it's for, and your mobile number.",
            format_rupees(MIN_AMOUNT),
            format_rupees(MAX_AMOUNT),
            MIN_TENURE_MONTHS,
            MAX_TENURE_MONTHS
        ),
        Stage::Identity => {
            "Share the 10-digit mobile number registered with your bank so I can verify you.".to_string()
        }
        Stage::Decisioning => "I'm checking your eligibility. Reply 'continue' to see your result.".to_string(),
        Stage::DocumentCheck => {
            "Share your monthly take-home salary, or let me know once you've uploaded your salary slip."
                .to_string()
        }
        Stage::Outcome | Stage::Done => {
            "Your application has a decision. You can ask about your EMI or say 'bye' to finish.".to_string()
        }
    };
    Reply::new(text, stage).with_meta("help", json!(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{LoanPurpose, LoanRequest, TransitionKind};
    use crate::services::{MemoryStore, SyntheticBureau};
    use crate::state::ManualClock;
    use crate::testing::{responders_with, FailingStore};

    fn engine_with(store: Arc<dyn ConversationStore>) -> LoanEngine {
        let bureau = Arc::new(SyntheticBureau::new());
        LoanEngine::new(&EngineConfig::default(), bureau.clone(), bureau, store).unwrap()
    }

    fn engine() -> LoanEngine {
        engine_with(Arc::new(MemoryStore::new()))
    }

    async fn drive(engine: &LoanEngine, id: &str, messages: &[&str]) -> Vec<Reply> {
        let mut replies = Vec::new();
        for message in messages {
            replies.push(engine.handle(id, message).await);
        }
        replies
    }

    #[tokio::test]
    async fn end_to_end_reaches_identity_then_a_decision() {
        let engine = engine();
        let replies = drive(
            &engine,
            "e2e-1",
            &["hi", "9876543210", "I need 5 lakh for 24 months, personal"],
        )
        .await;
        let stages: Vec<Stage> = replies.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![Stage::Requirements, Stage::Requirements, Stage::Identity]);
        assert!(replies.iter().all(|r| r.error.is_none()));

        let reply = engine.handle("e2e-1", "yes").await;
        assert!(
            matches!(reply.stage, Stage::Outcome | Stage::DocumentCheck),
            "ended at {}",
            reply.stage
        );
        let ctx = engine.state().get("e2e-1").unwrap();
        assert!(ctx.identity_verified);
        assert!(ctx.decision.is_some());
        assert!(engine.state().snapshots("e2e-1").unwrap().len() >= 4);
    }

    #[tokio::test]
    async fn guards_reject_without_creating_state() {
        let engine = engine();
        let empty = engine.handle("g-1", "   ").await;
        assert!(empty.error.is_some());
        let long = engine.handle("g-1", &"a".repeat(2001)).await;
        assert!(long.error.is_some());
        let rude = engine.handle("g-1", "this is a scam").await;
        assert_eq!(rude.error.as_deref(), Some("blocked content"));
        assert!(!engine.state().contains("g-1"));
    }

    #[tokio::test]
    async fn help_gives_stage_guidance_without_moving() {
        let engine = engine();
        engine.handle("h-1", "hi").await;
        let reply = engine.handle("h-1", "help").await;
        assert_eq!(reply.stage, Stage::Requirements);
        assert_eq!(reply.metadata["help"], json!(true));
        assert!(reply.text.contains("borrow"));
    }

    #[tokio::test]
    async fn help_quotes_enforced_loan_bounds() {
        let engine = engine();
        engine.handle("h-2", "hi").await;
        let reply = engine.handle("h-2", "help").await;
        assert!(reply.text.contains("₹10,000 to ₹50,00,000"), "{}", reply.text);
        assert!(reply.text.contains("(6 to 84)"), "{}", reply.text);

        assert!(LoanRequest::new(MIN_AMOUNT, MIN_TENURE_MONTHS, LoanPurpose::Personal).is_ok());
        assert!(LoanRequest::new(MAX_AMOUNT, MAX_TENURE_MONTHS, LoanPurpose::Personal).is_ok());
    }

    #[tokio::test]
    async fn exit_pauses_and_next_message_resumes() {
        let engine = engine();
        drive(&engine, "x-1", &["hi", "9876543210"]).await;
        let bye = engine.handle("x-1", "bye").await;
        assert!(!bye.requires_more_input);
        assert!(engine.state().is_paused("x-1"));

        let back = engine.handle("x-1", "I need 3 lakh for 36 months for travel").await;
        assert!(!engine.state().is_paused("x-1"));
        assert_eq!(back.stage, Stage::Identity);
        let ctx = engine.state().get("x-1").unwrap();
        assert_eq!(ctx.phone.as_deref(), Some("9876543210"));
    }

    #[tokio::test]
    async fn correction_amends_confirmed_loan() {
        let engine = engine();
        drive(
            &engine,
            "c-1",
            &["hi", "9876543210", "I need 5 lakh for 24 months, personal"],
        )
        .await;
        let reply = engine.handle("c-1", "actually make it 3 lakh").await;
        assert!(reply.text.starts_with("Done, I've updated your"));
        let ctx = engine.state().get("c-1").unwrap();
        assert_eq!(ctx.loan.as_ref().map(|l| l.amount()), Some(300_000.0));
    }

    #[tokio::test]
    async fn invalid_correction_is_a_validation_reply() {
        let engine = engine();
        drive(
            &engine,
            "c-2",
            &["hi", "9876543210", "I need 5 lakh for 24 months, personal"],
        )
        .await;
        let reply = engine.handle("c-2", "actually change it to 2 crore").await;
        assert!(reply.error.is_some());
        assert_eq!(reply.stage, Stage::Identity);
        let ctx = engine.state().get("c-2").unwrap();
        assert_eq!(ctx.loan.as_ref().map(|l| l.amount()), Some(500_000.0));
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_transitions() {
        let engine = engine_with(Arc::new(FailingStore));
        let reply = engine.handle("p-1", "hi").await;
        assert_eq!(reply.stage, Stage::Requirements);
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn unknown_id_is_restored_from_store() {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let first = engine_with(store.clone());
        drive(&first, "r-1", &["hi", "9876543210"]).await;
        first.handle("r-1", "I need 5 lakh for 24 months, personal").await;

        let second = engine_with(store);
        assert!(!second.state().contains("r-1"));
        second.handle("r-1", "ok").await;
        let ctx = second.state().get("r-1").unwrap();
        assert!(ctx.loan.is_some());
        assert_ne!(ctx.stage(), Stage::Greeting);
    }

    /// Asks for a stage the state machine never allows from Requirements
    struct Leaping;

    #[async_trait::async_trait]
    impl crate::responder::Responder for Leaping {
        fn kind(&self) -> ResponderKind {
            ResponderKind::Requirements
        }

        async fn process(&self, _message: &str, ctx: &mut Context) -> Result<Reply> {
            let stage = ctx.stage();
            let reply = Reply::new("leaping ahead", stage);
            Ok(match stage {
                Stage::Greeting => reply.request(Stage::Requirements, TransitionKind::Forward),
                _ => reply.request(Stage::Outcome, TransitionKind::Forward),
            })
        }
    }

    #[tokio::test]
    async fn denied_transition_is_reported_and_stage_kept() {
        let bureau = Arc::new(SyntheticBureau::new());
        let engine = LoanEngine::with_responders(
            &EngineConfig::default(),
            responders_with(Arc::new(Leaping)),
            bureau,
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        assert_eq!(engine.handle("d-1", "hi").await.stage, Stage::Requirements);

        let reply = engine.handle("d-1", "hello again").await;
        assert_eq!(reply.stage, Stage::Requirements);
        assert_eq!(reply.metadata["transition_denied"]["target"], json!("outcome"));
    }

    fn clocked_engine(store: Arc<dyn ConversationStore>) -> (LoanEngine, Arc<ManualClock>) {
        let config = EngineConfig::default();
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let state = Arc::new(StateManager::with_clock(config.state.clone(), clock.clone()));
        let bureau = Arc::new(SyntheticBureau::new());
        let responders = ResponderSet::new(bureau.clone(), bureau.clone(), config.underwriting.clone());
        let engine = LoanEngine::with_state(&config, state, responders, bureau, store).unwrap();
        (engine, clock)
    }

    #[tokio::test]
    async fn expired_pause_starts_over() {
        let (engine, clock) = clocked_engine(Arc::new(MemoryStore::new()));
        drive(&engine, "w-1", &["hi", "9876543210", "bye"]).await;
        clock.advance(chrono::Duration::seconds(86_401));

        let reply = engine.handle("w-1", "hi").await;
        assert_eq!(reply.stage, Stage::Requirements);
        let ctx = engine.state().get("w-1").unwrap();
        assert!(ctx.phone.is_none());
        assert_eq!(ctx.user_message_count(), 1);
    }

    #[tokio::test]
    async fn messages_are_stamped_by_the_manager_clock() {
        let (engine, clock) = clocked_engine(Arc::new(MemoryStore::new()));
        clock.advance(chrono::Duration::hours(3));
        let expected = engine.state().now();
        engine.handle("t-1", "hi").await;

        let ctx = engine.state().get("t-1").unwrap();
        assert_eq!(ctx.history.len(), 2);
        assert!(ctx.history.iter().all(|m| m.at == expected));
        assert_eq!(ctx.metadata.created_at, expected);
    }

    #[tokio::test]
    async fn sweep_persists_abandoned_conversations() {
        let store = Arc::new(MemoryStore::new());
        let (engine, clock) = clocked_engine(store.clone());
        drive(&engine, "s-1", &["hi", "9876543210"]).await;
        clock.advance(chrono::Duration::seconds(1_801));

        let report = engine.sweep().await;
        assert_eq!(report.abandoned.len(), 1);
        assert!(!engine.state().contains("s-1"));
        let saved = store.load("s-1").await.unwrap().unwrap();
        assert!(saved.metadata.abandoned);
    }

    #[tokio::test]
    async fn end_releases_the_turn_lock() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        drive(&engine, "end-1", &["hi", "9876543210"]).await;
        assert!(engine.turns.lock().contains_key("end-1"));

        let ended = engine.end("end-1").unwrap();
        assert_eq!(ended.phone.as_deref(), Some("9876543210"));
        assert!(!engine.state().contains("end-1"));
        assert!(!engine.turns.lock().contains_key("end-1"));
        assert!(store.load("end-1").await.unwrap().is_some());
        assert!(engine.end("end-1").is_none());
    }

    #[tokio::test]
    async fn expired_pause_keeps_one_lock_for_the_fresh_conversation() {
        let (engine, clock) = clocked_engine(Arc::new(MemoryStore::new()));
        drive(&engine, "w-2", &["hi", "bye"]).await;
        clock.advance(chrono::Duration::seconds(86_401));
        engine.handle("w-2", "hi").await;
        assert_eq!(engine.turns.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conversations_run_concurrently() {
        let engine = Arc::new(engine());
        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("conc-{}", i);
                engine.handle(&id, "hi").await;
                engine.handle(&id, "9876543210").await.stage
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Stage::Requirements);
        }
        assert_eq!(engine.state().analytics().active, 8);
    }
}
