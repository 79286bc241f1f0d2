use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static LIVE: AtomicBool = AtomicBool::new(false);

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some(v) if !v.is_empty() && v != "0")
}

/// Whether live-check mode is on. Read once from the `LIVECHECK` environment
/// variable; when enabled, every run path returns zeroed placeholders of the
/// declared shape instead of executing.
pub fn live_check() -> bool {
    INIT.call_once(|| {
        let env = std::env::var("LIVECHECK").ok();
        LIVE.store(parse_flag(env.as_deref()), Ordering::SeqCst);
    });
    LIVE.load(Ordering::SeqCst)
}

/// Overrides the live-check flag, for hosts that embed the DSL and cannot
/// control the process environment.
pub fn set_live_check(on: bool) {
    INIT.call_once(|| {});
    LIVE.store(on, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::parse_flag;

    #[test]
    fn unset_empty_and_zero_are_off() {
        assert!(!parse_flag(None));
        assert!(!parse_flag(Some("")));
        assert!(!parse_flag(Some("0")));
    }

    #[test]
    fn any_other_value_is_on() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("00")));
    }
}
