// src/listen/retry.rs

use std::thread;

use super::AttemptOutcome;
use crate::diag::Severity;
use crate::endpoint::Endpoint;
use crate::error::ListenError;
use crate::options::OptionSet;

/// Runs `attempt` until it accepts a connection or fails for good.
///
/// `RetryLater` and `RetryNow` are retried while the endpoint's retry policy
/// allows it, each time with a fresh copy of `template`; `RetryLater` first
/// pauses for the policy's interval. `Fatal` is returned unchanged in every
/// mode. With retrying disabled a retryable failure becomes
/// [`ListenError::NoMoreRetries`].
pub fn retry_loop<F>(
  endpoint: &mut Endpoint,
  mut options: OptionSet,
  template: &OptionSet,
  mut attempt: F,
) -> Result<(), ListenError>
where
  F: FnMut(&mut Endpoint, &mut OptionSet, Severity) -> AttemptOutcome,
{
  let mut attempts: u32 = 0;

  loop {
    let severity = Severity::for_policy(endpoint.retry_policy());
    attempts = attempts.saturating_add(1);

    let (error, pause) = match attempt(endpoint, &mut options, severity) {
      AttemptOutcome::Accepted => return Ok(()),
      AttemptOutcome::RetryLater(e) => (e, true),
      AttemptOutcome::RetryNow(e) => (e, false),
      AttemptOutcome::Fatal(e) => return Err(e),
    };

    let policy = *endpoint.retry_policy();
    if !policy.is_retrying() {
      return Err(ListenError::NoMoreRetries {
        attempts,
        last: Box::new(error),
      });
    }

    tracing::info!(
      endpoint = %endpoint.name(),
      attempt = attempts,
      retries_left = policy.retry,
      forever = policy.forever,
      pause = pause,
      error = %error,
      "listen attempt failed, retrying"
    );

    drop(std::mem::replace(&mut options, template.clone()));
    if pause {
      thread::sleep(policy.interval);
    }
    // Rebuilt again after the pause so no attempt starts from leftovers.
    options = template.clone();
    endpoint.retry_policy_mut().retry = policy.retry.saturating_sub(1);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::endpoint::RetryPolicy;
  use crate::options::{OptName, OptValue};
  use std::io;
  use std::time::{Duration, Instant};

  fn transient() -> ListenError {
    ListenError::Socket(io::Error::from(io::ErrorKind::OutOfMemory))
  }

  fn template() -> OptionSet {
    OptionSet::new()
      .with(OptName::Backlog, OptValue::Int(9))
      .unwrap()
      .with(OptName::ReuseAddr, OptValue::Bool(true))
      .unwrap()
  }

  #[test]
  fn test_finite_retry_attempts_n_plus_one_times() {
    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::new(3, Duration::ZERO));
    let mut calls = 0;
    let result = retry_loop(&mut ep, template(), &template(), |_, _, _| {
      calls += 1;
      AttemptOutcome::RetryLater(transient())
    });
    assert_eq!(calls, 4);
    match result {
      Err(ListenError::NoMoreRetries { attempts, last }) => {
        assert_eq!(attempts, 4);
        assert!(matches!(*last, ListenError::Socket(_)));
      }
      other => panic!("expected NoMoreRetries, got {:?}", other),
    }
    assert_eq!(ep.retry_policy().retry, 0);
  }

  #[test]
  fn test_no_retry_mode_fails_after_one_attempt() {
    let mut ep = Endpoint::new("TCP-LISTEN");
    let mut calls = 0;
    let result = retry_loop(&mut ep, template(), &template(), |_, _, severity| {
      calls += 1;
      assert_eq!(severity, Severity::Error);
      AttemptOutcome::RetryNow(transient())
    });
    assert_eq!(calls, 1);
    assert!(matches!(result, Err(ListenError::NoMoreRetries { attempts: 1, .. })));
  }

  #[test]
  fn test_fatal_is_never_retried() {
    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::forever(Duration::ZERO));
    let mut calls = 0;
    let result = retry_loop(&mut ep, template(), &template(), |_, _, _| {
      calls += 1;
      AttemptOutcome::Fatal(ListenError::ForkNotAllowed)
    });
    assert_eq!(calls, 1);
    assert!(matches!(result, Err(ListenError::ForkNotAllowed)));
  }

  #[test]
  fn test_every_attempt_starts_from_template() {
    let tpl = template();
    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::new(2, Duration::ZERO));
    let mut seen = Vec::new();
    // The first attempt gets a live set that already differs from the template.
    let mut live = tpl.clone();
    live.take_int(OptName::Backlog);

    let _ = retry_loop(&mut ep, live, &tpl, |_, opts, _| {
      seen.push(opts.clone());
      opts.take_bool(OptName::ReuseAddr);
      opts.take_int(OptName::Backlog);
      AttemptOutcome::RetryLater(transient())
    });

    assert_eq!(seen.len(), 3);
    assert_ne!(seen[0], tpl);
    assert_eq!(seen[1], tpl);
    assert_eq!(seen[2], tpl);
  }

  #[test]
  fn test_forever_retries_until_success() {
    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::forever(Duration::ZERO));
    let mut calls = 0;
    let result = retry_loop(&mut ep, template(), &template(), |_, _, severity| {
      calls += 1;
      assert_eq!(severity, Severity::Info);
      if calls < 10 {
        AttemptOutcome::RetryNow(transient())
      } else {
        AttemptOutcome::Accepted
      }
    });
    assert!(result.is_ok());
    assert_eq!(calls, 10);
    assert!(ep.retry_policy().forever);
  }

  #[test]
  fn test_retry_later_pauses_and_retry_now_does_not() {
    let interval = Duration::from_millis(60);

    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::new(2, interval));
    let start = Instant::now();
    let _ = retry_loop(&mut ep, template(), &template(), |_, _, _| {
      AttemptOutcome::RetryLater(transient())
    });
    assert!(start.elapsed() >= interval * 2);

    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::new(2, Duration::from_secs(30)));
    let start = Instant::now();
    let _ = retry_loop(&mut ep, template(), &template(), |_, _, _| {
      AttemptOutcome::RetryNow(transient())
    });
    assert!(start.elapsed() < Duration::from_secs(5));
  }

  #[test]
  fn test_last_attempt_reports_at_error_severity() {
    let mut ep = Endpoint::new("TCP-LISTEN").with_retry(RetryPolicy::new(1, Duration::ZERO));
    let mut severities = Vec::new();
    let _ = retry_loop(&mut ep, template(), &template(), |_, _, severity| {
      severities.push(severity);
      AttemptOutcome::RetryNow(transient())
    });
    assert_eq!(severities, vec![Severity::Info, Severity::Error]);
  }
}
