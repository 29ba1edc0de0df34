//! Sub-signal vocabulary normalization.

use pulse_core::{SignalColor, SubSignal};

/// Map an evaluator's raw vocabulary onto the four normalized colours.
///
/// Matching is case-insensitive; unknown or empty input is neutral.
pub fn normalize_signal(raw: &str) -> SignalColor {
    match raw.trim().to_ascii_lowercase().as_str() {
        "green" | "go" | "bullish" | "lean_bull" | "enter" => SignalColor::Green,
        "red" | "stop" | "bearish" | "lean_bear" => SignalColor::Red,
        "yellow" | "wait" | "neutral" | "caution" => SignalColor::Yellow,
        _ => SignalColor::Neutral,
    }
}

/// Fill in the normalized colour of every sub-signal. The raw `signal` is kept.
pub fn normalize_sub_signals(signals: &mut [SubSignal]) {
    for signal in signals {
        signal.color = Some(normalize_signal(&signal.signal));
    }
}

/// A sub-signal counts towards alignment when it is green or voted to enter.
pub fn is_aligned(signal: &SubSignal) -> bool {
    signal.color == Some(SignalColor::Green)
        || signal
            .vote
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("enter") || v.eq_ignore_ascii_case("go"))
}
