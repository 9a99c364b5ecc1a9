//! Command metrics
//!
//! - `identity_commands_total` (counter): labels `lane`, `outcome`
//! - `identity_command_duration_seconds` (histogram): label `lane`
//!
//! The runtime installs no recorder; these are no-ops until the embedding
//! application installs one.

/// Record a completed command.
pub fn record_command(lane: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("identity_commands_total", "lane" => lane, "outcome" => outcome).increment(1);
    metrics::histogram!("identity_command_duration_seconds", "lane" => lane).record(duration_secs);
}

/// Record a redirect completion that found no registered interactive command.
pub fn record_orphan_completion() {
    metrics::counter!("identity_orphan_completions_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_command("silent", "success", 0.01);
        record_orphan_completion();
    }

    #[test]
    fn record_command_carries_lane_and_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_command("interactive", "cancel", 12.0);
        record_command("silent", "success", 0.2);

        let output = handle.render();
        assert!(output.contains("identity_commands_total"));
        assert!(output.contains("lane=\"interactive\""));
        assert!(output.contains("outcome=\"cancel\""));
        assert!(output.contains("lane=\"silent\""));
        assert!(output.contains("identity_command_duration_seconds"));
    }

    #[test]
    fn orphan_completions_are_counted() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_orphan_completion();
        assert!(handle.render().contains("identity_orphan_completions_total"));
    }
}
