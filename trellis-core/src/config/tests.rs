#[cfg(test)]
mod tests {
    use crate::config::model::*;
    use crate::error::ErrorCode;

    fn create_test_rule() -> RateLimitRule {
        RateLimitRule {
            id: "rule-1".to_string(),
            resource: LimitResource::Qps,
            limit_type: LimitType::Global,
            amounts: vec![RateAmount {
                amount: 1000,
                duration_seconds: 1,
            }],
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = ResilienceSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.health.detect_interval_seconds, 10);
        assert_eq!(settings.health.fusing_timeout_seconds, 5);
        assert_eq!(settings.health.report_interval_seconds, 300);
        assert_eq!(settings.health.report_threshold, 10000);
        assert_eq!(settings.warmup.warm_time_seconds, 10);
        assert_eq!(settings.warmup.warn_factor, 3.0);
        assert_eq!(settings.warmup.idle_period_ticks, 3);
        assert!(settings.balance.dynamic_weight);
        assert_eq!(settings.hash_ring.virtual_nodes, 160);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings: ResilienceSettings = toml::from_str("").unwrap();
        assert_eq!(settings.health.detect_interval_seconds, 10);
        assert!(settings.balance.dynamic_weight);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings: ResilienceSettings = toml::from_str(
            r#"
            [health]
            detect_interval_seconds = 2
            fusing_timeout_seconds = 1

            [warmup]
            warn_factor = 4.0

            [balance]
            dynamic_weight = false
            "#,
        )
        .unwrap();
        assert_eq!(settings.health.detect_interval_seconds, 2);
        assert_eq!(settings.health.fusing_timeout_seconds, 1);
        // 未覆盖的字段保持默认
        assert_eq!(settings.health.report_threshold, 10000);
        assert_eq!(settings.warmup.warn_factor, 4.0);
        assert!(!settings.balance.dynamic_weight);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_warn_factor_below_two_is_rejected() {
        let mut settings = ResilienceSettings::default();
        settings.warmup.warn_factor = 1.5;
        let err = settings.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_zero_detect_interval_is_rejected() {
        let mut settings = ResilienceSettings::default();
        settings.health.detect_interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_virtual_nodes_is_rejected() {
        let mut settings = ResilienceSettings::default();
        settings.hash_ring.virtual_nodes = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rule_validation() {
        assert!(create_test_rule().validate().is_ok());

        let mut rule = create_test_rule();
        rule.amounts.clear();
        assert!(rule.validate().is_err());

        let mut rule = create_test_rule();
        rule.amounts[0].duration_seconds = 0;
        assert!(rule.validate().is_err());

        let mut rule = create_test_rule();
        rule.id = String::new();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_rule_toml_defaults() {
        let rule: RateLimitRule = toml::from_str(
            r#"
            id = "warm-rule"
            amounts = [{ amount = 600, duration_seconds = 60 }]
            "#,
        )
        .unwrap();
        assert_eq!(rule.resource, LimitResource::Qps);
        assert_eq!(rule.limit_type, LimitType::Global);
        assert_eq!(rule.amounts.len(), 1);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&BalanceStrategy::SmoothWeightedRoundRobin).unwrap();
        assert_eq!(json, "\"smooth_weighted_round_robin\"");
        let parsed: BalanceStrategy = serde_json::from_str("\"consistent_hash_ring\"").unwrap();
        assert_eq!(parsed, BalanceStrategy::ConsistentHashRing);
        assert_eq!(BalanceStrategy::default(), BalanceStrategy::WeightedRandom);
    }
}
