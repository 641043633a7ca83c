//! Turns a provider report into a company inference
//!
//! Policy, in order: provider network flags, consumer ISP match, legal-entity
//! suffix scoring, downgrade of weak identities, ambiguity.

use regex::Regex;
use std::sync::LazyLock;

use super::providers::ProviderReport;
use crate::models::{AttributionState, CompanyInference, NetworkType};

pub const FLAGGED_CONFIDENCE: f64 = 0.1;
pub const CORPORATE_ASN_WEIGHT: f64 = 0.3;
pub const COMPANY_NAME_WEIGHT: f64 = 0.4;
pub const COMPANY_DOMAIN_WEIGHT: f64 = 0.2;
/// Below this an identity is withheld
pub const MIN_IDENTITY_CONFIDENCE: f64 = 0.3;
/// Below this an inference is ambiguous
pub const AMBIGUITY_THRESHOLD: f64 = 0.5;

static LEGAL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s,])(?:inc|llc|l\.l\.c|ltd|limited|corp|corporation|gmbh|ag|plc)\.?\s*$")
        .expect("legal suffix regex is valid")
});

static ISP_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:telecom|telekom|telecommunications?|broadband|cable|dsl|fib(?:er|re)|cellular|wireless|mobile|residential|dial-?up|dynamic|internet service provider|isp)\b",
    )
    .expect("isp keyword regex is valid")
});

static KNOWN_ISP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:comcast|verizon|at&t|charter communications|cox communications|centurylink|frontier communications|t-mobile|vodafone|orange s\.?a|deutsche telekom|telefonica|movistar|british telecommunications|virgin media|talktalk|free sas|societe francaise du radiotelephone|bouygues|rogers communications|bell canada|shaw communications|telus|telstra|optus|reliance jio|bharti airtel|china telecom|china unicom|kddi|softbank|kpn|ziggo|swisscom|proximus|telia|telenor|fastweb|iliad)\b",
    )
    .expect("known isp regex is valid")
});

static CLOUD_ORG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:amazon(?:\.com)?|aws|google cloud|microsoft azure|azure|digitalocean|linode|akamai|ovh|hetzner|vultr|scaleway|oracle cloud|alibaba cloud|tencent cloud|cloudflare|fastly|leaseweb|contabo|choopa|hosting|datacenter|data center|colocation|server)\b",
    )
    .expect("cloud org regex is valid")
});

static CLOUD_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|\.)(?:amazonaws\.com|googleusercontent\.com|cloudfront\.net|azure\.com|cloudapp\.net|linodeusercontent\.com|digitalocean\.com|vultrusercontent\.com|your-server\.de|ovh\.net|akamaitechnologies\.com|fastly\.net|herokuapp\.com|cloudflare\.com)$",
    )
    .expect("cloud domain regex is valid")
});

pub fn has_legal_suffix(name: &str) -> bool {
    LEGAL_SUFFIX.is_match(name.trim())
}

pub fn looks_like_consumer_isp(name: &str) -> bool {
    ISP_KEYWORD.is_match(name) || KNOWN_ISP.is_match(name)
}

pub fn looks_like_cloud(name: &str) -> bool {
    CLOUD_ORG.is_match(name)
}

/// Registrable domain guessed from a reverse-DNS hostname: the last two
/// labels, or three for common second-level public suffixes
pub fn domain_from_hostname(hostname: &str) -> Option<String> {
    let hostname = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = hostname.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 || labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let second_level = labels[labels.len() - 2];
    let take = if matches!(second_level, "co" | "com" | "net" | "org" | "ac" | "gov")
        && labels[labels.len() - 1].len() == 2
        && labels.len() >= 3
    {
        3
    } else {
        2
    };
    Some(labels[labels.len() - take..].join("."))
}

/// Something must be left once the legal suffix is removed
fn is_usable_company_name(name: &str) -> bool {
    let stem = LEGAL_SUFFIX.replace(name.trim(), "");
    stem.chars().filter(|c| c.is_alphabetic()).count() >= 2 && !looks_like_cloud(name)
}

/// Classify `report` into an inference. `event_id` and `created_at` are
/// filled in by the caller.
pub fn classify(report: &ProviderReport) -> CompanyInference {
    let mut reasons = vec![format!("resolved by {}", report.provider)];

    let organization = report
        .organization
        .clone()
        .or_else(|| report.asn_organization.clone());
    let names: Vec<&str> = [&report.organization, &report.asn_organization, &report.isp]
        .into_iter()
        .filter_map(|n| n.as_deref())
        .collect();

    let flagged = if report.flags.vpn {
        Some(NetworkType::Vpn)
    } else if report.flags.proxy {
        Some(NetworkType::Proxy)
    } else if report.flags.hosting {
        Some(NetworkType::Hosting)
    } else if report.flags.mobile {
        Some(NetworkType::Mobile)
    } else {
        None
    };

    let (network_type, mut confidence, mut company_name, mut domain) = if let Some(network) =
        flagged
    {
        reasons.push(format!("provider flags the network as {network}"));
        (network, FLAGGED_CONFIDENCE, None, None)
    } else if names.iter().any(|n| looks_like_cloud(n)) {
        reasons.push("organization is a cloud or hosting provider".to_string());
        (NetworkType::Hosting, FLAGGED_CONFIDENCE, None, None)
    } else if report.flags.isp || names.iter().any(|n| looks_like_consumer_isp(n)) {
        reasons.push("organization matches a consumer ISP".to_string());
        (NetworkType::Residential, 0.0, None, None)
    } else if let Some(name) = organization.as_deref().filter(|n| has_legal_suffix(n)) {
        reasons.push(format!("'{name}' carries a legal-entity suffix"));
        let mut confidence = 0.0;

        if report.asn_organization.as_deref().is_some_and(has_legal_suffix) {
            confidence += CORPORATE_ASN_WEIGHT;
            reasons.push("ASN is registered to a company".to_string());
        }

        let company_name = if is_usable_company_name(name) {
            confidence += COMPANY_NAME_WEIGHT;
            reasons.push("usable company name".to_string());
            Some(name.to_string())
        } else {
            None
        };

        let domain = report
            .domain
            .clone()
            .or_else(|| report.hostname.as_deref().and_then(domain_from_hostname))
            .filter(|d| !CLOUD_DOMAIN.is_match(d));
        if let Some(domain) = &domain {
            confidence += COMPANY_DOMAIN_WEIGHT;
            reasons.push(format!("resolves to company domain {domain}"));
        }

        (NetworkType::Corporate, confidence, company_name, domain)
    } else {
        reasons.push("no legal-entity suffix in organization".to_string());
        (NetworkType::Unknown, 0.0, None, None)
    };

    confidence = confidence.clamp(0.0, 1.0);

    let mut network_type = network_type;
    if network_type == NetworkType::Corporate
        && (confidence < MIN_IDENTITY_CONFIDENCE || company_name.is_none())
    {
        reasons.push(format!(
            "confidence {confidence:.2} too low to name a company"
        ));
        network_type = NetworkType::Unknown;
        company_name = None;
        domain = None;
    }

    let is_ambiguous = confidence < AMBIGUITY_THRESHOLD || network_type.is_masking();
    if is_ambiguous {
        reasons.push("ambiguous".to_string());
    }

    CompanyInference {
        event_id: 0,
        inferred_company_name: company_name,
        domain,
        industry: None,
        size: None,
        location: report.location(),
        confidence_score: confidence,
        confidence_reasons: reasons,
        network_type,
        asn_organization: report.asn_organization.clone(),
        is_ambiguous,
        attribution_state: AttributionState::Inferred,
        created_at: 0,
        confirmed_at: None,
    }
}
