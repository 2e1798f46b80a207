//! Crawler command-line construction.
//!
//! The stored job config is the single source of truth; this module is the
//! only place it is turned into an argv. Flags mirror the crawler binary's
//! CLI contract one-to-one.

use std::path::Path;

use crate::config::JobConfig;

/// Build the crawler argv (without the binary itself).
pub fn build_crawler_args(name: &str, output_dir: &Path, config: &JobConfig) -> Vec<String> {
    let opts = &config.tool_options;
    let mut args = Vec::new();

    for seed in &config.seeds {
        args.push("--seeds".to_string());
        args.push(seed.clone());
    }

    args.push("--name".to_string());
    args.push(name.to_string());
    args.push("--output-dir".to_string());
    args.push(output_dir.display().to_string());

    args.push("--initial-workers".to_string());
    args.push(opts.initial_workers.to_string());
    if opts.adaptive_workers {
        args.push("--adaptive-workers".to_string());
    }

    args.push("--stall-timeout-minutes".to_string());
    args.push(opts.stall_timeout_minutes.to_string());

    if let Some(shm) = &opts.docker_shm_size {
        args.push("--docker-shm-size".to_string());
        args.push(shm.clone());
    }
    if let Some(mem) = &opts.docker_memory_limit {
        args.push("--docker-memory-limit".to_string());
        args.push(mem.clone());
    }
    if let Some(cpu) = &opts.docker_cpu_limit {
        args.push("--docker-cpu-limit".to_string());
        args.push(cpu.clone());
    }
    if let Some(restarts) = opts.max_container_restarts {
        args.push("--max-container-restarts".to_string());
        args.push(restarts.to_string());
    }
    if let Some(threshold) = opts.error_threshold_timeout {
        args.push("--error-threshold-timeout".to_string());
        args.push(threshold.to_string());
    }
    if let Some(threshold) = opts.error_threshold_http {
        args.push("--error-threshold-http".to_string());
        args.push(threshold.to_string());
    }
    if let Some(delay) = opts.backoff_delay_minutes {
        args.push("--backoff-delay-minutes".to_string());
        args.push(delay.to_string());
    }

    for rule in &opts.scope_rules {
        args.push("--scope".to_string());
        args.push(rule.clone());
    }

    if opts.skip_final_build {
        args.push("--skip-final-build".to_string());
    }
    if opts.relax_perms {
        args.push("--relax-perms".to_string());
    }
    if opts.monitoring {
        args.push("--monitoring".to_string());
    }
    if opts.vpn_rotation {
        args.push("--vpn-rotation".to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn config(payload: serde_json::Value) -> JobConfig {
        JobConfig::from_value(&payload).unwrap()
    }

    #[test]
    fn minimal_config_builds_defaults() {
        let config = config(json!({
            "seeds": ["https://www.canada.ca/en/health-canada.html"]
        }));
        let args = build_crawler_args("hc-20260801", &PathBuf::from("/data/hc-20260801"), &config);

        assert_eq!(
            args,
            vec![
                "--seeds",
                "https://www.canada.ca/en/health-canada.html",
                "--name",
                "hc-20260801",
                "--output-dir",
                "/data/hc-20260801",
                "--initial-workers",
                "1",
                "--stall-timeout-minutes",
                "30",
            ]
        );
    }

    #[test]
    fn repeatable_flags_repeat() {
        let config = config(json!({
            "seeds": ["https://a.example/", "https://b.example/"],
            "tool_options": {
                "scope_rules": ["^https://a\\.example/", "^https://b\\.example/"],
                "skip_final_build": true,
                "relax_perms": true,
                "docker_shm_size": "1g"
            }
        }));
        let args = build_crawler_args("hc-20260801", &PathBuf::from("/data/j"), &config);

        assert_eq!(args.iter().filter(|a| *a == "--seeds").count(), 2);
        assert_eq!(args.iter().filter(|a| *a == "--scope").count(), 2);
        assert!(args.contains(&"--skip-final-build".to_string()));
        assert!(args.contains(&"--relax-perms".to_string()));
        let shm_at = args.iter().position(|a| a == "--docker-shm-size").unwrap();
        assert_eq!(args[shm_at + 1], "1g");
    }
}
