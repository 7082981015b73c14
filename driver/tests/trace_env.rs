//! Environment round-trip for the trace gate. Lives outside the library
//! crate because mutating the process environment is unsafe under edition
//! 2024 and the library forbids unsafe code.

use std::env;

use strand_driver::Trace;

const VARS: [&str; 3] = ["TRACE_RAW", "TRACE_FRM", "TRACE_DRV"];

// The whole module runs in one test so the process environment is never
// touched concurrently.
#[test]
fn env_round_trip() {
    let set = |name: &str, value: Option<&str>| match value {
        Some(v) => unsafe { env::set_var(name, v) },
        None => unsafe { env::remove_var(name) },
    };

    // every truthy/falsey combination of the three variables
    for mask in 0u8..8 {
        set(VARS[0], (mask & 1 != 0).then_some("1"));
        set(VARS[1], (mask & 2 != 0).then_some("true"));
        set(VARS[2], (mask & 4 != 0).then_some("YES"));

        let trace = Trace::from_env();
        assert_eq!(trace.contains(Trace::RAW), mask & 1 != 0, "mask {mask}");
        assert_eq!(trace.contains(Trace::FRM), mask & 2 != 0, "mask {mask}");
        assert_eq!(trace.contains(Trace::DRV), mask & 4 != 0, "mask {mask}");
    }

    // non-truthy values leave the bits clear
    for value in ["0", "false", "no", "off", "junk", ""] {
        for name in VARS {
            set(name, Some(value));
        }
        assert!(!Trace::from_env().any(), "value {value:?}");
    }

    for name in VARS {
        set(name, None);
    }
    assert!(!Trace::from_env().any());
}
