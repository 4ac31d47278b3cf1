use std::time::Duration;

use serde::Deserialize;

/// How the delay between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    /// Doubles after every failed attempt, capped at `max_delay`.
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

/// Waits between attempts. Swapped for a recorder in tests.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// All attempts failed; carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
            max_delay: delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }

    /// Run `op` until it returns `Ok` or `max_attempts` is reached.
    ///
    /// `op` receives the 1-based attempt number. `sleep` is called between
    /// attempts only, never after the last one.
    pub fn run<T, E>(
        &self,
        sleep: &mut dyn FnMut(Duration),
        mut op: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, RetryExhausted<E>> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(_) => {
                    sleep(self.delay_after(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_on_nth_attempt() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
        let mut sleeps = Vec::new();
        let mut calls = 0;

        let result: Result<&str, RetryExhausted<String>> = policy.run(&mut |d| sleeps.push(d), |attempt| {
            calls += 1;
            if attempt < 3 { Err(format!("attempt {attempt} failed")) } else { Ok("up") }
        });

        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls, 3);
        assert_eq!(sleeps, vec![Duration::from_secs(2); 2]);
    }

    #[test]
    fn test_exhausted_reports_attempts_and_last_error() {
        let policy = RetryPolicy::fixed(4, Duration::from_millis(10));
        let mut sleeps = 0;

        let err = policy
            .run(&mut |_| sleeps += 1, |attempt| Err::<(), _>(attempt))
            .unwrap_err();

        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, 4);
        assert_eq!(sleeps, 3);
    }

    #[test]
    fn test_first_success_never_sleeps() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        let mut slept = false;
        let value = policy.run(&mut |_| slept = true, |_| Ok::<_, ()>(7)).unwrap();
        assert_eq!(value, 7);
        assert!(!slept);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        let mut calls = 0;
        let _ = policy.run(&mut |_| {}, |_| {
            calls += 1;
            Err::<(), ()>(())
        });
        assert_eq!(calls, 1);
    }
}
