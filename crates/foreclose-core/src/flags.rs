//! Statically declared flag registries, one per settings namespace.

use serde::{Deserialize, Serialize};

use crate::settings::{FlagRegistry, Preset, SettingValue, SettingsNamespace, ValueKind};

/// Third-party enrichment calls. Declaration order is the call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentEndpoint {
    ZillowProperty,
    ZillowZestimate,
    ZillowPriceHistory,
    ZillowTaxHistory,
    ZillowComps,
    ZillowRentEstimate,
    AiExtraction,
    SkipTrace,
}

impl EnrichmentEndpoint {
    pub const ALL: [EnrichmentEndpoint; 8] = [
        EnrichmentEndpoint::ZillowProperty,
        EnrichmentEndpoint::ZillowZestimate,
        EnrichmentEndpoint::ZillowPriceHistory,
        EnrichmentEndpoint::ZillowTaxHistory,
        EnrichmentEndpoint::ZillowComps,
        EnrichmentEndpoint::ZillowRentEstimate,
        EnrichmentEndpoint::AiExtraction,
        EnrichmentEndpoint::SkipTrace,
    ];

    pub fn is_zillow(self) -> bool {
        !matches!(
            self,
            EnrichmentEndpoint::AiExtraction | EnrichmentEndpoint::SkipTrace
        )
    }
}

impl FlagRegistry for EnrichmentEndpoint {
    const NAMESPACE: SettingsNamespace = SettingsNamespace::Enrichment;

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn key(self) -> &'static str {
        match self {
            EnrichmentEndpoint::ZillowProperty => "zillow_property",
            EnrichmentEndpoint::ZillowZestimate => "zillow_zestimate",
            EnrichmentEndpoint::ZillowPriceHistory => "zillow_price_history",
            EnrichmentEndpoint::ZillowTaxHistory => "zillow_tax_history",
            EnrichmentEndpoint::ZillowComps => "zillow_comps",
            EnrichmentEndpoint::ZillowRentEstimate => "zillow_rent_estimate",
            EnrichmentEndpoint::AiExtraction => "ai_extraction",
            EnrichmentEndpoint::SkipTrace => "skip_trace",
        }
    }

    fn default_value(self) -> SettingValue {
        SettingValue::Bool(matches!(
            self,
            EnrichmentEndpoint::ZillowProperty
                | EnrichmentEndpoint::ZillowZestimate
                | EnrichmentEndpoint::ZillowPriceHistory
                | EnrichmentEndpoint::ZillowTaxHistory
        ))
    }

    fn builtin_presets() -> Vec<Preset<Self>> {
        use EnrichmentEndpoint::*;
        let mut minimal = Preset::new("minimal").with_description("Property details only");
        let mut standard =
            Preset::new("standard").with_description("Core Zillow data without paid add-ons");
        let mut full = Preset::new("full").with_description("Every endpoint");
        for endpoint in Self::ALL {
            minimal = minimal.with_value(endpoint, endpoint == ZillowProperty);
            let core_zillow = endpoint.is_zillow() && endpoint != ZillowRentEstimate;
            standard = standard.with_value(endpoint, core_zillow);
            full = full.with_value(endpoint, true);
        }
        vec![minimal, standard, full]
    }
}

/// Deal-intelligence toggles surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealFeature {
    WatchlistAlerts,
    PriceDropAlerts,
    AuctionReminders,
    CompsAnalysis,
    RentEstimates,
    SkipTracing,
    AiSummaries,
    DealScoring,
}

impl DealFeature {
    pub const ALL: [DealFeature; 8] = [
        DealFeature::WatchlistAlerts,
        DealFeature::PriceDropAlerts,
        DealFeature::AuctionReminders,
        DealFeature::CompsAnalysis,
        DealFeature::RentEstimates,
        DealFeature::SkipTracing,
        DealFeature::AiSummaries,
        DealFeature::DealScoring,
    ];
}

impl FlagRegistry for DealFeature {
    const NAMESPACE: SettingsNamespace = SettingsNamespace::Features;

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn key(self) -> &'static str {
        match self {
            DealFeature::WatchlistAlerts => "watchlist_alerts",
            DealFeature::PriceDropAlerts => "price_drop_alerts",
            DealFeature::AuctionReminders => "auction_reminders",
            DealFeature::CompsAnalysis => "comps_analysis",
            DealFeature::RentEstimates => "rent_estimates",
            DealFeature::SkipTracing => "skip_tracing",
            DealFeature::AiSummaries => "ai_summaries",
            DealFeature::DealScoring => "deal_scoring",
        }
    }

    fn default_value(self) -> SettingValue {
        SettingValue::Bool(matches!(
            self,
            DealFeature::WatchlistAlerts
                | DealFeature::PriceDropAlerts
                | DealFeature::AuctionReminders
        ))
    }

    fn value_column(self) -> String {
        format!("feature_{}", self.key())
    }

    fn lock_column(self) -> String {
        format!("feature_lock_{}", self.key())
    }

    fn builtin_presets() -> Vec<Preset<Self>> {
        use DealFeature::*;
        let alerts_only = Self::ALL.into_iter().fold(
            Preset::new("alerts_only").with_description("Notifications, no analysis"),
            |preset, feature| {
                preset.with_value(
                    feature,
                    matches!(feature, WatchlistAlerts | PriceDropAlerts | AuctionReminders),
                )
            },
        );
        let analyst = Preset::new("analyst")
            .with_description("Comps, rent estimates, summaries and scoring")
            .with_value(CompsAnalysis, true)
            .with_value(RentEstimates, true)
            .with_value(AiSummaries, true)
            .with_value(DealScoring, true);
        vec![alerts_only, analyst]
    }
}

/// Numeric underwriting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentParam {
    TargetRoiPct,
    MaxBidToValuePct,
    RehabContingencyPct,
    ClosingCostPct,
    HoldingPeriodMonths,
    MinEquityPct,
}

impl InvestmentParam {
    pub const ALL: [InvestmentParam; 6] = [
        InvestmentParam::TargetRoiPct,
        InvestmentParam::MaxBidToValuePct,
        InvestmentParam::RehabContingencyPct,
        InvestmentParam::ClosingCostPct,
        InvestmentParam::HoldingPeriodMonths,
        InvestmentParam::MinEquityPct,
    ];
}

impl FlagRegistry for InvestmentParam {
    const NAMESPACE: SettingsNamespace = SettingsNamespace::Investment;

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn key(self) -> &'static str {
        match self {
            InvestmentParam::TargetRoiPct => "target_roi_pct",
            InvestmentParam::MaxBidToValuePct => "max_bid_to_value_pct",
            InvestmentParam::RehabContingencyPct => "rehab_contingency_pct",
            InvestmentParam::ClosingCostPct => "closing_cost_pct",
            InvestmentParam::HoldingPeriodMonths => "holding_period_months",
            InvestmentParam::MinEquityPct => "min_equity_pct",
        }
    }

    fn kind(self) -> ValueKind {
        ValueKind::Number
    }

    fn default_value(self) -> SettingValue {
        SettingValue::Number(match self {
            InvestmentParam::TargetRoiPct => 20.0,
            InvestmentParam::MaxBidToValuePct => 70.0,
            InvestmentParam::RehabContingencyPct => 10.0,
            InvestmentParam::ClosingCostPct => 3.0,
            InvestmentParam::HoldingPeriodMonths => 6.0,
            InvestmentParam::MinEquityPct => 25.0,
        })
    }

    fn builtin_presets() -> Vec<Preset<Self>> {
        use InvestmentParam::*;
        vec![
            Preset::new("conservative")
                .with_description("Lower bids, bigger cushion")
                .with_value(TargetRoiPct, 25.0)
                .with_value(MaxBidToValuePct, 60.0)
                .with_value(RehabContingencyPct, 15.0)
                .with_value(MinEquityPct, 35.0),
            Preset::new("aggressive")
                .with_description("Thinner margins, faster flips")
                .with_value(TargetRoiPct, 12.0)
                .with_value(MaxBidToValuePct, 80.0)
                .with_value(HoldingPeriodMonths, 4.0)
                .with_value(MinEquityPct, 15.0),
        ]
    }
}
