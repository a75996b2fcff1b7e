//! Live editing state of one module plus its request gate.
//!
//! Each module owns one [`ModuleSession`]; there is no lock shared between
//! modules. The gate keeps a module to one in-flight request and drops
//! responses whose ticket is no longer the latest one issued.

use serde::Serialize;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RequestTicket {
    seq: u64,
    id: Ulid,
}

impl RequestTicket {
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Correlation id for logs.
    #[must_use]
    pub fn id(&self) -> Ulid {
        self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestGate {
    issued: u64,
    in_flight: Option<u64>,
}

impl RequestGate {
    /// Issues a ticket, or `None` while a request is already in flight.
    pub fn begin(&mut self) -> Option<RequestTicket> {
        if self.in_flight.is_some() {
            return None;
        }

        self.issued += 1;
        self.in_flight = Some(self.issued);
        Some(RequestTicket {
            seq: self.issued,
            id: Ulid::new(),
        })
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Closes the in-flight request when `ticket` is the current one.
    /// Returns `false` for stale tickets, whose response must be dropped.
    pub fn finish(&mut self, ticket: &RequestTicket) -> bool {
        if self.in_flight == Some(ticket.seq) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Abandons the in-flight request; its late response becomes stale.
    pub fn cancel(&mut self) -> bool {
        self.in_flight.take().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSession<I, O> {
    pub input: I,
    pub result: Option<O>,
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) gate: RequestGate,
}

/// Compares editing state only; the gate is not part of it.
impl<I: PartialEq, O: PartialEq> PartialEq for ModuleSession<I, O> {
    fn eq(&self, other: &Self) -> bool {
        self.input == other.input && self.result == other.result && self.error == other.error
    }
}

impl<I: Default, O> Default for ModuleSession<I, O> {
    fn default() -> Self {
        Self::new(I::default())
    }
}

impl<I, O> ModuleSession<I, O> {
    #[must_use]
    pub fn new(input: I) -> Self {
        Self {
            input,
            result: None,
            error: None,
            gate: RequestGate::default(),
        }
    }

    #[must_use]
    pub fn with_result(input: I, result: O) -> Self {
        Self {
            result: Some(result),
            ..Self::new(input)
        }
    }

    #[must_use]
    pub fn with_error(input: I, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(input)
        }
    }

    /// Starts an operation: clears the previous result and error and issues a
    /// ticket. `None` means the submit control is disabled.
    pub fn begin(&mut self) -> Option<RequestTicket> {
        let ticket = self.gate.begin()?;
        self.result = None;
        self.error = None;
        Some(ticket)
    }

    /// Applies an operation outcome. Stale tickets leave the session untouched
    /// and return `false`.
    pub fn complete(&mut self, ticket: &RequestTicket, outcome: Result<O, String>) -> bool {
        if !self.gate.finish(ticket) {
            return false;
        }

        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.error = None;
            }
            Err(message) => {
                self.error = Some(message);
            }
        }
        true
    }

    /// Runs a synchronous collaborator call through the gate.
    pub fn run<F>(&mut self, flow: F) -> bool
    where
        F: FnOnce(&I) -> Result<O, String>,
    {
        let Some(ticket) = self.begin() else {
            return false;
        };
        let outcome = flow(&self.input);
        self.complete(&ticket, outcome)
    }

    pub fn cancel_in_flight(&mut self) -> bool {
        self.gate.cancel()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.gate.is_in_flight()
    }

    /// True once an operation has produced a result or an error.
    #[must_use]
    pub fn is_concluded(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    #[test]
    fn second_begin_is_refused_while_in_flight() {
        let mut session: ModuleSession<String, String> = ModuleSession::new("input".to_string());
        let first = must_some(session.begin());
        assert!(session.is_in_flight());
        assert!(session.begin().is_none());

        assert!(session.complete(&first, Ok("done".to_string())));
        assert!(!session.is_in_flight());
        assert_eq!(session.result.as_deref(), Some("done"));
    }

    #[test]
    fn stale_response_after_cancel_is_dropped() {
        let mut session: ModuleSession<String, String> = ModuleSession::new("input".to_string());
        let stale = must_some(session.begin());
        assert!(session.cancel_in_flight());

        let fresh = must_some(session.begin());
        assert!(fresh.seq() > stale.seq());
        assert!(session.complete(&fresh, Ok("fresh".to_string())));
        assert!(!session.complete(&stale, Ok("stale".to_string())));
        assert_eq!(session.result.as_deref(), Some("fresh"));
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let mut session: ModuleSession<String, String> = ModuleSession::default();
        let ticket = must_some(session.begin());
        assert!(session.complete(&ticket, Err("timeout".to_string())));
        assert!(!session.complete(&ticket, Ok("late".to_string())));
        assert_eq!(session.error.as_deref(), Some("timeout"));
        assert!(session.result.is_none());
    }

    #[test]
    fn run_clears_previous_error() {
        let mut session: ModuleSession<String, usize> =
            ModuleSession::with_error("abc".to_string(), "previous failure");
        assert!(session.run(|input| Ok(input.len())));
        assert_eq!(session.result, Some(3));
        assert!(session.error.is_none());
        assert!(session.is_concluded());
    }
}
