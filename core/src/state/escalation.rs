use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::config::EscalationConfig;
use crate::conversation::{Context, EscalationFlag};
use crate::responder::extract::contains_phrase;

/// Flags tripped by the context as of `now`. Stage is never consulted.
pub fn derive(ctx: &Context, config: &EscalationConfig, now: DateTime<Utc>) -> BTreeSet<EscalationFlag> {
    let mut flags = BTreeSet::new();

    if ctx
        .recent_user_messages(config.recent_messages)
        .any(|text| contains_phrase(text, &config.frustration_markers))
    {
        flags.insert(EscalationFlag::Frustration);
    }
    if ctx.metadata.transitions_since_reset > config.max_transitions {
        flags.insert(EscalationFlag::RepeatedTransitions);
    }
    let elapsed = now.signed_duration_since(ctx.metadata.created_at);
    if elapsed.num_seconds() > config.max_duration_secs as i64 {
        flags.insert(EscalationFlag::LongRunning);
    }
    flags
}
