use std::{env, fmt, ops};

/// Trace categories recognized by the driver.
///
/// Captured once from the environment when a driver is created and handed
/// down to every connector and its transport; never consulted as ambient
/// global state afterwards.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Trace(u8);

impl Trace {
    /// No tracing.
    pub const OFF: Self = Self(0);
    /// Raw byte traffic.
    pub const RAW: Self = Self(1);
    /// Protocol frames.
    pub const FRM: Self = Self(1 << 1);
    /// Driver lifecycle events.
    pub const DRV: Self = Self(1 << 2);

    /// Captures trace flags from `TRACE_RAW`, `TRACE_FRM` and `TRACE_DRV`.
    pub fn from_env() -> Self {
        let mut trace = Self::OFF;
        if env_bool("TRACE_RAW") {
            trace |= Self::RAW;
        }
        if env_bool("TRACE_FRM") {
            trace |= Self::FRM;
        }
        if env_bool("TRACE_DRV") {
            trace |= Self::DRV;
        }
        trace
    }

    pub fn any(self) -> bool {
        self.0 != 0
    }

    pub fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }
}

impl ops::BitOr for Trace {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Trace {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.any() {
            return f.write_str("OFF");
        }
        let mut sep = "";
        for (flag, name) in [(Self::RAW, "RAW"), (Self::FRM, "FRM"), (Self::DRV, "DRV")] {
            if self.contains(flag) {
                write!(f, "{sep}{name}")?;
                sep = "|";
            }
        }
        Ok(())
    }
}

fn env_bool(name: &str) -> bool {
    env::var(name).is_ok_and(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
