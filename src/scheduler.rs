//! SM-2 derived interval scheduling.
//!
//! The engine is a pure mapping from the current review state, a grade and the
//! number of days actually elapsed since the previous review to the next state.
//! The only source of nondeterminism is the fuzz factor applied to long
//! intervals, which comes from an injectable [`FuzzFn`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::StdRng;

use crate::state::{
    Grade, MAX_INTERVAL_DAYS, MIN_EASE_FACTOR, ReviewInput, ReviewOutput, after_days,
};

const AGAIN_PENALTY: f64 = 0.2;
const HARD_MODIFIER: f64 = 0.8;
const EASY_MODIFIER: f64 = 1.1;
const RETENTION_THRESHOLD: f64 = 1.5;
const RETENTION_MULTIPLIER: f64 = 1.5;
const RETENTION_EASE_BONUS: f64 = 0.15;
const FUZZ_MIN_INTERVAL: u32 = 10;
const FUZZ_LOW: f64 = 0.95;
const FUZZ_HIGH: f64 = 1.05;

/// Draws the factor long intervals are multiplied by. The default draws
/// uniformly from `[0.95, 1.05]`.
#[derive(Clone)]
#[allow(clippy::type_complexity)]
pub struct FuzzFn(pub Arc<dyn Fn(&mut StdRng) -> f64 + Sync + Send>);

impl FuzzFn {
    /// Always returns `factor`, for reproducible schedules.
    pub fn fixed(factor: f64) -> Self {
        Self(Arc::new(move |_| factor))
    }
}

impl Default for FuzzFn {
    fn default() -> Self {
        Self(Arc::new(|rng| rng.random_range(FUZZ_LOW..=FUZZ_HIGH)))
    }
}

impl PartialEq for FuzzFn {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl std::fmt::Debug for FuzzFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Wrap(<function>)")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scheduler {
    fuzz_fn: FuzzFn,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fuzz(fuzz_fn: FuzzFn) -> Self {
        Self { fuzz_fn }
    }

    /// Computes the state that follows a review graded `grade`.
    ///
    /// `actual_elapsed_days` is the real gap since the previous review. Live
    /// attempts pass 0; history replay passes the measured gap so that late but
    /// successful reviews earn the retention bonus. Intervals are capped at
    /// [`MAX_INTERVAL_DAYS`].
    pub fn next_review(
        &self,
        input: &ReviewInput,
        grade: Grade,
        actual_elapsed_days: f64,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> ReviewOutput {
        if grade == Grade::Again {
            return ReviewOutput {
                next_review_at: after_days(now, 1),
                interval: 1,
                ease_factor: (input.ease_factor - AGAIN_PENALTY).max(MIN_EASE_FACTOR),
                repetitions: 0,
            };
        }

        let mut ease_factor = next_ease_factor(input.ease_factor, grade);
        let repetitions = input.repetitions + 1;

        let interval = match repetitions {
            1 => 1,
            2 => match grade {
                Grade::Hard => 3,
                Grade::Good => 5,
                Grade::Easy => 7,
                Grade::Again => 4,
            },
            _ => {
                let modifier = match grade {
                    Grade::Hard => HARD_MODIFIER,
                    Grade::Easy => EASY_MODIFIER,
                    _ => 1.0,
                };
                let mut calculated_days =
                    f64::from(input.current_interval) * ease_factor * modifier;
                if retention_bonus_applies(input.current_interval, grade, actual_elapsed_days) {
                    calculated_days =
                        calculated_days.max(actual_elapsed_days * RETENTION_MULTIPLIER);
                    ease_factor += RETENTION_EASE_BONUS;
                }
                calculated_days.round().min(f64::from(MAX_INTERVAL_DAYS)) as u32
            }
        };

        let interval = self.fuzz(interval, rng).clamp(1, MAX_INTERVAL_DAYS);

        ReviewOutput {
            next_review_at: after_days(now, interval),
            interval,
            ease_factor,
            repetitions,
        }
    }

    fn fuzz(&self, interval: u32, rng: &mut StdRng) -> u32 {
        if interval <= FUZZ_MIN_INTERVAL {
            return interval;
        }
        let factor = (self.fuzz_fn.0)(rng);
        (f64::from(interval) * factor).round() as u32
    }
}

fn next_ease_factor(ease_factor: f64, grade: Grade) -> f64 {
    let q = f64::from(3 - grade.value());
    (ease_factor + (0.1 - q * (0.08 + q * 0.02))).max(MIN_EASE_FACTOR)
}

fn retention_bonus_applies(current_interval: u32, grade: Grade, actual_elapsed_days: f64) -> bool {
    actual_elapsed_days > 0.0
        && grade >= Grade::Good
        && current_interval > 0
        && actual_elapsed_days > f64::from(current_interval) * RETENTION_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::days;
    use crate::test_helpers::{TestHelper, timestamp};
    use rand::SeedableRng;

    fn input(current_interval: u32, ease_factor: f64, repetitions: u32) -> ReviewInput {
        ReviewInput {
            current_interval,
            ease_factor,
            repetitions,
        }
    }

    fn unfuzzed() -> Scheduler {
        Scheduler::with_fuzz(FuzzFn::fixed(1.0))
    }

    #[test]
    fn first_good_review() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let output = unfuzzed().next_review(&input(0, 2.5, 0), Grade::Good, 0.0, now, &mut rng);
        assert_eq!(output.repetitions, 1);
        assert_eq!(output.interval, 1);
        assert_eq!(output.next_review_at, now + days(1));
        [output.ease_factor].assert_approx_eq([2.5]);
    }

    #[test]
    fn second_review_ladder() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let scheduler = unfuzzed();
        let intervals = [Grade::Hard, Grade::Good, Grade::Easy].map(|grade| {
            scheduler
                .next_review(&input(1, 2.5, 1), grade, 0.0, now, &mut rng)
                .interval
        });
        assert_eq!(intervals, [3, 5, 7]);

        let output = scheduler.next_review(&input(1, 2.5, 1), Grade::Easy, 0.0, now, &mut rng);
        assert_eq!(output.repetitions, 2);
        assert_eq!(output.interval, 7);
    }

    #[test]
    fn third_review_multiplies_interval() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let output = unfuzzed().next_review(&input(7, 2.6, 2), Grade::Good, 0.0, now, &mut rng);
        assert_eq!(output.repetitions, 3);
        assert_eq!(output.interval, 18);
        assert_eq!(output.next_review_at, now + days(18));
    }

    #[test]
    fn grade_modifiers() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let scheduler = unfuzzed();
        // EF 2.5 -> 2.36 for hard: 10 * 2.36 * 0.8 = 18.88
        let hard = scheduler.next_review(&input(10, 2.5, 3), Grade::Hard, 0.0, now, &mut rng);
        assert_eq!(hard.interval, 19);
        [hard.ease_factor].assert_approx_eq([2.36]);
        // EF 2.5 -> 2.6 for easy: 10 * 2.6 * 1.1 = 28.6
        let easy = scheduler.next_review(&input(10, 2.5, 3), Grade::Easy, 0.0, now, &mut rng);
        assert_eq!(easy.interval, 29);
        [easy.ease_factor].assert_approx_eq([2.6]);
    }

    #[test]
    fn again_resets_streak() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(7);
        let scheduler = Scheduler::new();
        for ease_factor in [1.3, 1.4, 1.45, 2.5, 3.1] {
            for (current_interval, repetitions) in [(0, 0), (1, 1), (30, 4), (200, 9)] {
                for elapsed in [0.0, 3.0, 400.0] {
                    let output = scheduler.next_review(
                        &input(current_interval, ease_factor, repetitions),
                        Grade::Again,
                        elapsed,
                        now,
                        &mut rng,
                    );
                    assert_eq!(output.interval, 1);
                    assert_eq!(output.repetitions, 0);
                    assert_eq!(output.next_review_at, now + days(1));
                    assert_eq!(output.ease_factor, (ease_factor - 0.2).max(1.3));
                }
            }
        }
    }

    #[test]
    fn ease_factor_and_interval_floors() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(2024);
        let scheduler = Scheduler::new();
        for _ in 0..2000 {
            let current = input(
                rng.random_range(0..400),
                rng.random_range(1.3..3.5),
                rng.random_range(0..12),
            );
            let grade = Grade::from_repr(rng.random_range(0..4)).unwrap();
            let elapsed = rng.random_range(0.0..600.0);
            let output = scheduler.next_review(&current, grade, elapsed, now, &mut rng);
            assert!(output.ease_factor >= 1.3, "{current:?} {grade} -> {output:?}");
            assert!(output.interval >= 1, "{current:?} {grade} -> {output:?}");
        }
        let output = scheduler.next_review(&input(5, 1.3, 4), Grade::Hard, 0.0, now, &mut rng);
        assert_eq!(output.ease_factor, 1.3);
    }

    #[test]
    fn stale_zero_interval_still_schedules_a_day() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(1);
        let output = unfuzzed().next_review(&input(0, 2.5, 4), Grade::Good, 0.0, now, &mut rng);
        assert_eq!(output.interval, 1);
        assert_eq!(output.repetitions, 5);
    }

    #[test]
    fn zero_interval_earns_no_retention_bonus() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(1);
        let output =
            unfuzzed().next_review(&input(0, 2.5, 4), Grade::Good, 100.0, now, &mut rng);
        assert_eq!(output.interval, 1);
        [output.ease_factor].assert_approx_eq([2.5]);
    }

    #[test]
    fn interval_is_capped() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(1);
        let output = Scheduler::with_fuzz(FuzzFn::fixed(1.05)).next_review(
            &input(30_000, 2.5, 20),
            Grade::Easy,
            0.0,
            now,
            &mut rng,
        );
        assert_eq!(output.interval, MAX_INTERVAL_DAYS);
        assert_eq!(output.next_review_at, now + days(MAX_INTERVAL_DAYS));

        let output = unfuzzed().next_review(
            &input(MAX_INTERVAL_DAYS, 2.5, 20),
            Grade::Good,
            0.0,
            DateTime::<Utc>::MAX_UTC - days(10),
            &mut rng,
        );
        assert_eq!(output.interval, MAX_INTERVAL_DAYS);
        assert_eq!(output.next_review_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn fuzz_leaves_short_intervals_alone() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(3);
        let scheduler = Scheduler::with_fuzz(FuzzFn::fixed(1.05));
        // 4 * 2.5 = 10, exactly at the boundary
        let output = scheduler.next_review(&input(4, 2.5, 2), Grade::Good, 0.0, now, &mut rng);
        assert_eq!(output.interval, 10);
        // 5 * 2.5 = 12.5 -> 13 before fuzz, 13.65 -> 14 after
        let output = scheduler.next_review(&input(5, 2.5, 2), Grade::Good, 0.0, now, &mut rng);
        assert_eq!(output.interval, 14);
    }

    #[test]
    fn fuzz_stays_within_five_percent() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(99);
        let scheduler = Scheduler::new();
        for current_interval in 5..200u32 {
            let current = input(current_interval, 2.5, 3);
            let expected = (f64::from(current_interval) * 2.5).round();
            let output = scheduler.next_review(&current, Grade::Good, 0.0, now, &mut rng);
            let interval = f64::from(output.interval);
            assert!(interval >= (expected * 0.95).round(), "{current_interval}");
            assert!(interval <= (expected * 1.05).round(), "{current_interval}");
        }
    }

    #[test]
    fn default_fuzz_is_uniform_in_range() {
        let fuzz = FuzzFn::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..1000 {
            let factor = (fuzz.0)(&mut rng);
            assert!((0.95..=1.05).contains(&factor));
        }
    }

    #[test]
    fn retention_bonus_after_long_gap() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let scheduler = unfuzzed();
        // regular: 10 * 2.5 = 25; bonus: 40 * 1.5 = 60
        let output = scheduler.next_review(&input(10, 2.5, 3), Grade::Good, 40.0, now, &mut rng);
        assert_eq!(output.interval, 60);
        [output.ease_factor].assert_approx_eq([2.65]);

        // bonus applies to the EF even when the regular interval is longer
        let output = scheduler.next_review(&input(10, 2.5, 3), Grade::Easy, 16.0, now, &mut rng);
        assert_eq!(output.interval, 29);
        [output.ease_factor].assert_approx_eq([2.75]);
    }

    #[test]
    fn retention_bonus_threshold_is_strict() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let scheduler = unfuzzed();
        let output = scheduler.next_review(&input(10, 2.5, 3), Grade::Good, 15.0, now, &mut rng);
        assert_eq!(output.interval, 25);
        [output.ease_factor].assert_approx_eq([2.5]);

        let output = scheduler.next_review(&input(10, 2.5, 3), Grade::Good, 15.01, now, &mut rng);
        [output.ease_factor].assert_approx_eq([2.65]);
    }

    #[test]
    fn no_retention_bonus_for_hard() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let output =
            unfuzzed().next_review(&input(10, 2.5, 3), Grade::Hard, 500.0, now, &mut rng);
        assert_eq!(output.interval, 19);
        [output.ease_factor].assert_approx_eq([2.36]);
    }

    #[test]
    fn no_retention_bonus_in_early_tiers() {
        let now = timestamp(0);
        let mut rng = StdRng::seed_from_u64(42);
        let scheduler = unfuzzed();
        let output = scheduler.next_review(&input(1, 2.5, 1), Grade::Good, 90.0, now, &mut rng);
        assert_eq!(output.interval, 5);
        [output.ease_factor].assert_approx_eq([2.5]);
    }
}
