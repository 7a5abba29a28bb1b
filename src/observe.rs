use std::time::Duration;

use crate::error::Error;

/// Record a request that got an answer (any completion code).
pub(crate) fn record_ok(
    mode: &'static str,
    netfn: u8,
    cmd: u8,
    elapsed: Duration,
    completion_code: u8,
) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "mode" => mode, "outcome" => "ok").increment(1);
        metrics::histogram!("ipmi_request_seconds", "mode" => mode).record(elapsed.as_secs_f64());
        if completion_code != 0x00 {
            metrics::counter!("ipmi_completion_code_nonzero_total", "mode" => mode).increment(1);
        }
    }

    tracing::debug!(
        mode,
        netfn,
        cmd,
        completion_code,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "ipmi request ok"
    );
}

/// Record a request that failed before a response could be matched.
pub(crate) fn record_err(mode: &'static str, netfn: u8, cmd: u8, elapsed: Duration, err: &Error) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "mode" => mode, "outcome" => "err").increment(1);
        metrics::counter!(
            "ipmi_request_errors_total",
            "mode" => mode,
            "kind" => err.kind()
        )
        .increment(1);
        metrics::histogram!("ipmi_request_seconds", "mode" => mode).record(elapsed.as_secs_f64());
    }

    tracing::warn!(
        mode,
        netfn,
        cmd,
        kind = err.kind(),
        error = %err,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "ipmi request failed"
    );
}
