use std::sync::Once;

use chrono::{DateTime, Utc};

pub(crate) trait TestHelper {
    fn assert_approx_eq(&self, expected: Self);
}

impl<const N: usize> TestHelper for [f64; N] {
    #[track_caller]
    fn assert_approx_eq(&self, expected: Self) {
        for (i, (a, b)) in self.iter().zip(expected.iter()).enumerate() {
            assert!(
                (a - b).abs() < 1e-9,
                "element {i}: expected {b}, got {a} ({self:?} vs {expected:?})"
            );
        }
    }
}

pub(crate) fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

static LOGGER: Once = Once::new();

/// Routes `log` output to stderr so failing tests show what the service did.
pub(crate) fn init_logger() {
    LOGGER.call_once(|| {
        let _ = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{} {}] {}",
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(std::io::stderr())
            .apply();
    });
}
