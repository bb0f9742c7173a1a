use std::future::Future;
use tokio::time::{sleep, Duration};

/// Attempt budget for a polling wait. Exhaustion is an outcome, not an error;
/// callers decide whether it is fatal.
#[derive(Clone, Copy, Debug)]
pub enum Budget {
    Attempts(u32),
    Unbounded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied,
    Exhausted,
}

impl PollOutcome {
    pub fn satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied)
    }
}

/// Sleep `interval`, then re-evaluate `predicate` against freshly fetched
/// state, until it holds or the budget runs out. No backoff; interval and
/// budget are fixed per call site.
pub async fn await_condition<F, Fut, E>(
    interval: Duration,
    budget: Budget,
    mut predicate: F,
) -> Result<PollOutcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut remaining = match budget {
        Budget::Attempts(n) => Some(n),
        Budget::Unbounded => None,
    };
    loop {
        if let Some(0) = remaining {
            return Ok(PollOutcome::Exhausted);
        }
        sleep(interval).await;
        if predicate().await? {
            return Ok(PollOutcome::Satisfied);
        }
        if let Some(n) = remaining.as_mut() {
            *n -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn satisfied_once_predicate_holds() {
        let calls = AtomicU32::new(0);
        let outcome = await_condition(Duration::from_millis(1), Budget::Attempts(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(n >= 2) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Satisfied);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_when_budget_runs_out() {
        let calls = AtomicU32::new(0);
        let outcome = await_condition(Duration::from_millis(1), Budget::Attempts(4), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(false) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Exhausted);
        // one evaluation per attempt, never memoized
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn predicate_errors_propagate() {
        let res: Result<PollOutcome, &str> =
            await_condition(Duration::from_millis(1), Budget::Attempts(3), || async {
                Err("fetch failed")
            })
            .await;
        assert_eq!(res.unwrap_err(), "fetch failed");
    }
}
