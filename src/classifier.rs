//! Classifies a discovered program into a [`StatusTag`] and [`BenefitType`] via an
//! eight-step decision tree, independent of the extraction and cache-matching
//! stages earlier in the pipeline.
//!
//! This stage runs last, after cross-worker dedup, and answers a different
//! question than [`crate::join`]'s dedup pass: not "is this the same record we
//! already have," but "is this record worth showing a user at all, and if so
//! what kind of benefit is it." Its duplicate check is intentionally independent
//! of [`crate::identity`]'s cache threshold and [`crate::join`]'s merge
//! threshold — it compares against a separately supplied list of already-known
//! programs using its own, looser thresholds.

use chrono::NaiveDate;

/// Disposition assigned to a classified program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StatusTag {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "FEDERAL")]
    Federal,
    #[serde(rename = "DUPLICATE")]
    Duplicate,
    #[serde(rename = "EXPIRED")]
    Expired,
    #[serde(rename = "NON-INCENTIVE")]
    NonIncentive,
    #[serde(rename = "MISSING-LINK")]
    MissingLink,
    #[serde(rename = "HALLUCINATION")]
    Hallucination,
    #[serde(rename = "REVIEW")]
    Review,
}

impl StatusTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTag::Active => "ACTIVE",
            StatusTag::Federal => "FEDERAL",
            StatusTag::Duplicate => "DUPLICATE",
            StatusTag::Expired => "EXPIRED",
            StatusTag::NonIncentive => "NON-INCENTIVE",
            StatusTag::MissingLink => "MISSING-LINK",
            StatusTag::Hallucination => "HALLUCINATION",
            StatusTag::Review => "REVIEW",
        }
    }
}

/// Kind of benefit a program offers, distinct from (and finer-grained than) the
/// free-text `benefit_type` an LLM extraction produces — this is the taxonomy the
/// classifier normalizes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenefitType {
    TaxCredit,
    WageSubsidy,
    WageReimbursement,
    TrainingGrant,
    Bonding,
    RiskMitigation,
    Service,
    JobSeekerOnly,
    Unknown,
}

impl BenefitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenefitType::TaxCredit => "tax_credit",
            BenefitType::WageSubsidy => "wage_subsidy",
            BenefitType::WageReimbursement => "wage_reimbursement",
            BenefitType::TrainingGrant => "training_grant",
            BenefitType::Bonding => "bonding",
            BenefitType::RiskMitigation => "risk_mitigation",
            BenefitType::Service => "service",
            BenefitType::JobSeekerOnly => "job_seeker_only",
            BenefitType::Unknown => "unknown",
        }
    }

    fn is_employer_benefit_type(&self) -> bool {
        matches!(
            self,
            BenefitType::TaxCredit
                | BenefitType::WageSubsidy
                | BenefitType::WageReimbursement
                | BenefitType::TrainingGrant
                | BenefitType::Bonding
                | BenefitType::RiskMitigation
        )
    }
}

/// WOTC's last-known expiration date; historically reauthorized retroactively, but
/// still flagged EXPIRED past this date until that happens again.
const WOTC_EXPIRATION: NaiveDate = match NaiveDate::from_ymd_opt(2025, 12, 31) {
    Some(d) => d,
    None => unreachable!(),
};

/// Appended to a WOTC-named program's classification the first time the
/// date-based expiration check fires, so a reviewer sees why a program with no
/// explicit "expired" text in its source data still got tagged `EXPIRED`.
const WOTC_REAUTH_NOTE: &str =
    "WOTC authorization has lapsed past its last known expiration date and is pending reauthorization.";

const EXPIRED_INDICATORS: &[&str] = &["expired", "discontinued", "ended", "no longer", "terminated", "closed"];

const FEDERAL_INDICATORS: &[&str] = &[
    "wotc", "work opportunity", "federal bonding", "federal",
    "department of labor", "dol", "irs", "internal revenue",
    "wioa", "veterans affairs", "va ", "department of defense",
    "social security", "ssa",
];

const LOCAL_INDICATORS: &[&str] = &["city", "county", "municipal", "metro"];

const EMPLOYER_KEYWORDS: &[&str] = &[
    "employer receives", "employer can claim", "employers may",
    "credit against", "reduce tax", "reimbursement to employer",
    "subsidize wages", "wage subsidy", "employer incentive",
];

const COST_REDUCING_SERVICE_INDICATORS: &[&str] = &[
    "pre-screened", "job-ready", "trained candidate",
    "free training", "on-the-job training", "ojt",
    "job coach", "retention", "support specialist",
    "workplace accommodation", "reasonable accommodation",
];

const LOW_VALUE_SERVICE_INDICATORS: &[&str] =
    &["job posting", "job board", "career fair", "resume database", "networking event"];

/// Fields the classifier needs to reason about a program. A subset of
/// [`crate::cache::Program`]/[`crate::cache::NewProgram`]'s fields, since the
/// classifier only cares about the textual description of a program, not its
/// cache bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ClassificationInput<'a> {
    pub program_name: &'a str,
    pub description: &'a str,
    pub agency: &'a str,
    pub source_url: &'a str,
    pub status: &'a str,
    pub notes: &'a str,
    pub max_value: &'a str,
    pub program_type: &'a str,
    pub explicit_jurisdiction: Option<&'a str>,
}

/// A previously-known program to check new candidates against for duplicates.
#[derive(Debug, Clone, Default)]
pub struct KnownProgram<'a> {
    pub program_name: &'a str,
    pub agency: &'a str,
    pub source_url: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub program_name: String,
    pub status_tag: StatusTag,
    pub benefit_type: BenefitType,
    pub is_employer_benefit: bool,
    pub reduces_employer_costs: bool,
    pub jurisdiction: String,
    pub confidence: crate::cache::Confidence,
    pub reasoning: String,
    /// Explanatory note for a disposition that isn't self-evident from
    /// `status_tag` alone. Set only by the WOTC date-based expiration check,
    /// and only the first time — `None` once `input.notes` already carries it,
    /// so a caller that persists this note back onto the record never
    /// duplicates it on a later classification pass.
    pub note: Option<String>,
}

/// Run the full eight-step decision tree against `input`, checking for
/// duplicates against `known`. `today` is threaded in rather than read from the
/// clock so expiration checks are deterministic in tests.
pub fn classify_program(
    input: &ClassificationInput,
    known: &[KnownProgram],
    today: NaiveDate,
) -> ClassificationResult {
    use crate::cache::Confidence;

    let program_name = if input.program_name.is_empty() { "Unknown" } else { input.program_name };

    let (expired, note) = is_expired(input, today);
    if expired {
        return ClassificationResult {
            program_name: program_name.to_string(),
            status_tag: StatusTag::Expired,
            benefit_type: determine_benefit_type(input),
            is_employer_benefit: true,
            reduces_employer_costs: true,
            jurisdiction: determine_jurisdiction(input),
            confidence: Confidence::High,
            reasoning: "Program status indicates expired or discontinued".to_string(),
            note,
        };
    }

    if input.source_url.trim().is_empty() {
        let benefit_type = determine_benefit_type(input);
        let is_benefit = !matches!(benefit_type, BenefitType::JobSeekerOnly | BenefitType::Unknown);
        return ClassificationResult {
            program_name: program_name.to_string(),
            status_tag: StatusTag::MissingLink,
            benefit_type,
            is_employer_benefit: is_benefit,
            reduces_employer_costs: is_benefit,
            jurisdiction: determine_jurisdiction(input),
            confidence: Confidence::Low,
            reasoning: "No source URL provided - cannot verify program exists".to_string(),
            note: None,
        };
    }

    if let Some(dup_name) = find_duplicate(input, known) {
        return ClassificationResult {
            program_name: program_name.to_string(),
            status_tag: StatusTag::Duplicate,
            benefit_type: determine_benefit_type(input),
            is_employer_benefit: true,
            reduces_employer_costs: true,
            jurisdiction: determine_jurisdiction(input),
            confidence: Confidence::High,
            reasoning: format!("Duplicate of existing program: {dup_name}"),
            note: None,
        };
    }

    let jurisdiction = determine_jurisdiction(input);
    if jurisdiction == "federal" {
        return ClassificationResult {
            program_name: program_name.to_string(),
            status_tag: StatusTag::Federal,
            benefit_type: determine_benefit_type(input),
            is_employer_benefit: true,
            reduces_employer_costs: true,
            jurisdiction: "federal".to_string(),
            confidence: Confidence::High,
            reasoning: "Federal program with state implementation".to_string(),
            note: None,
        };
    }

    let benefit_type = determine_benefit_type(input);
    let is_employer_benefit = is_employer_benefit(input, benefit_type);

    if !is_employer_benefit {
        return ClassificationResult {
            program_name: program_name.to_string(),
            status_tag: StatusTag::NonIncentive,
            benefit_type,
            is_employer_benefit: false,
            reduces_employer_costs: false,
            jurisdiction,
            confidence: Confidence::Medium,
            reasoning: "Program does not provide direct benefit to employers".to_string(),
            note: None,
        };
    }

    if benefit_type == BenefitType::Service && !service_reduces_employer_costs(input) {
        return ClassificationResult {
            program_name: program_name.to_string(),
            status_tag: StatusTag::NonIncentive,
            benefit_type,
            is_employer_benefit: false,
            reduces_employer_costs: false,
            jurisdiction,
            confidence: Confidence::Medium,
            reasoning: "Service does not provide tangible cost reduction for employers".to_string(),
            note: None,
        };
    }

    ClassificationResult {
        program_name: program_name.to_string(),
        status_tag: StatusTag::Active,
        benefit_type,
        is_employer_benefit: true,
        reduces_employer_costs: true,
        jurisdiction,
        confidence: Confidence::High,
        reasoning: format!("Active {} program with direct employer benefit", benefit_type.as_str()),
        note: None,
    }
}

/// Returns whether the program is expired and, if the WOTC-specific
/// date check is what fired, the explanatory note to go with it. The note is
/// suppressed once `input.notes` already contains it, so a caller that writes
/// this note back onto the stored record never accumulates repeats across
/// classification runs.
fn is_expired(input: &ClassificationInput, today: NaiveDate) -> (bool, Option<String>) {
    let status = input.status.to_lowercase();
    let notes = input.notes.to_lowercase();
    if EXPIRED_INDICATORS.iter().any(|i| status.contains(i) || notes.contains(i)) {
        return (true, None);
    }

    let name = input.program_name.to_lowercase();
    if (name.contains("wotc") || name.contains("work opportunity")) && today > WOTC_EXPIRATION {
        if notes.contains(&WOTC_REAUTH_NOTE.to_lowercase()) {
            return (true, None);
        }
        return (true, Some(WOTC_REAUTH_NOTE.to_string()));
    }

    (false, None)
}

/// Name-similarity-only match at 85, or name+agency both at 70 — looser than
/// [`crate::join::JOIN_MATCH_THRESHOLD`] since this compares against a
/// potentially much larger and older known-programs list where exact wording
/// drifts further. An exact source URL match always counts regardless of score.
fn find_duplicate<'a>(input: &ClassificationInput, known: &'a [KnownProgram]) -> Option<&'a str> {
    let name = input.program_name.to_lowercase();
    let agency = input.agency.to_lowercase();
    let url = input.source_url.trim();

    for candidate in known {
        let known_name = candidate.program_name.to_lowercase();
        let known_agency = candidate.agency.to_lowercase();
        let known_url = candidate.source_url.trim();

        if !url.is_empty() && !known_url.is_empty() && url == known_url {
            return Some(candidate.program_name);
        }

        let name_sim = strsim::normalized_levenshtein(&name, &known_name) * 100.0;
        if name_sim >= 85.0 {
            return Some(candidate.program_name);
        }

        let agency_sim = if !agency.is_empty() && !known_agency.is_empty() {
            strsim::normalized_levenshtein(&agency, &known_agency) * 100.0
        } else {
            0.0
        };
        if name_sim >= 70.0 && agency_sim >= 70.0 {
            return Some(candidate.program_name);
        }
    }

    None
}

fn determine_jurisdiction(input: &ClassificationInput) -> String {
    if let Some(explicit) = input.explicit_jurisdiction {
        let explicit = explicit.to_lowercase();
        if matches!(explicit.as_str(), "federal" | "state" | "local") {
            return explicit;
        }
    }

    let name = input.program_name.to_lowercase();
    let agency = input.agency.to_lowercase();

    if FEDERAL_INDICATORS.iter().any(|i| name.contains(i) || agency.contains(i)) {
        return "federal".to_string();
    }
    if LOCAL_INDICATORS.iter().any(|i| name.contains(i) || agency.contains(i)) {
        return "local".to_string();
    }
    "state".to_string()
}

fn determine_benefit_type(input: &ClassificationInput) -> BenefitType {
    let program_type = input.program_type.to_lowercase();
    match program_type.as_str() {
        "tax_credit" | "tax credit" => return BenefitType::TaxCredit,
        "wage_subsidy" | "wage subsidy" => return BenefitType::WageSubsidy,
        "wage_reimbursement" | "reimbursement" => return BenefitType::WageReimbursement,
        "training_grant" | "training grant" | "training" => return BenefitType::TrainingGrant,
        "bonding" | "bond" => return BenefitType::Bonding,
        "risk_mitigation" => return BenefitType::RiskMitigation,
        "service" => return BenefitType::Service,
        _ => {}
    }

    let name = input.program_name.to_lowercase();
    let description = input.description.to_lowercase();
    let text = format!("{name} {description}");

    if text.contains("tax credit") || name.contains("credit") {
        return BenefitType::TaxCredit;
    }
    if text.contains("wage subsid") || text.contains("wage reimburs") {
        return BenefitType::WageSubsidy;
    }
    if text.contains("reimburse") {
        return BenefitType::WageReimbursement;
    }
    if text.contains("training") && (text.contains("grant") || !input.max_value.trim().is_empty()) {
        return BenefitType::TrainingGrant;
    }
    if text.contains("bond") {
        return BenefitType::Bonding;
    }
    if text.contains("ojt") || text.contains("on-the-job") {
        return BenefitType::WageReimbursement;
    }
    if text.contains("service") || text.contains("assistance") {
        return BenefitType::Service;
    }

    let job_seeker_indicators =
        ["job search", "resume", "career counseling", "training for participants", "support services"];
    if job_seeker_indicators.iter().any(|i| text.contains(i)) {
        return BenefitType::JobSeekerOnly;
    }

    BenefitType::Unknown
}

fn is_employer_benefit(input: &ClassificationInput, benefit_type: BenefitType) -> bool {
    if benefit_type.is_employer_benefit_type() {
        return true;
    }
    if benefit_type == BenefitType::JobSeekerOnly {
        return false;
    }

    let description = input.description.to_lowercase();
    if EMPLOYER_KEYWORDS.iter().any(|k| description.contains(k)) {
        return true;
    }

    input.max_value.contains('$')
}

/// Conservative by default: a service only counts as cost-reducing if it
/// matches a known cost-reducing pattern, never because it failed to match a
/// low-value one.
fn service_reduces_employer_costs(input: &ClassificationInput) -> bool {
    let name = input.program_name.to_lowercase();
    let description = input.description.to_lowercase();
    let text = format!("{name} {description}");

    if COST_REDUCING_SERVICE_INDICATORS.iter().any(|i| text.contains(i)) {
        return true;
    }
    if LOW_VALUE_SERVICE_INDICATORS.iter().any(|i| text.contains(i)) {
        return false;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Confidence;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    #[test]
    fn expired_status_text_wins_over_everything_else() {
        let input = ClassificationInput {
            program_name: "Some Program",
            status: "discontinued",
            source_url: "https://example.gov",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::Expired);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn wotc_past_expiration_date_is_flagged_expired() {
        let input = ClassificationInput {
            program_name: "Work Opportunity Tax Credit",
            source_url: "https://www.dol.gov/wotc",
            ..Default::default()
        };
        let after_expiration = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let result = classify_program(&input, &[], after_expiration);
        assert_eq!(result.status_tag, StatusTag::Expired);
        assert!(result.note.is_some());
    }

    #[test]
    fn wotc_expiration_note_is_not_repeated_once_already_recorded() {
        let input = ClassificationInput {
            program_name: "Work Opportunity Tax Credit",
            source_url: "https://www.dol.gov/wotc",
            notes: "WOTC authorization has lapsed past its last known expiration date and is pending reauthorization.",
            ..Default::default()
        };
        let after_expiration = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let result = classify_program(&input, &[], after_expiration);
        assert_eq!(result.status_tag, StatusTag::Expired);
        assert!(result.note.is_none());
    }

    #[test]
    fn wotc_before_expiration_date_is_not_expired() {
        let input = ClassificationInput {
            program_name: "Work Opportunity Tax Credit",
            source_url: "https://www.dol.gov/wotc",
            agency: "Department of Labor",
            ..Default::default()
        };
        let before = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let result = classify_program(&input, &[], before);
        assert_eq!(result.status_tag, StatusTag::Federal);
    }

    #[test]
    fn missing_source_url_is_missing_link() {
        let input = ClassificationInput {
            program_name: "Mystery Credit",
            program_type: "tax_credit",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::MissingLink);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn exact_url_match_is_duplicate_regardless_of_name() {
        let known = [KnownProgram {
            program_name: "Totally Different Name",
            agency: "Some Agency",
            source_url: "https://state.gov/program",
        }];
        let input = ClassificationInput {
            program_name: "Some New Name",
            source_url: "https://state.gov/program",
            ..Default::default()
        };
        let result = classify_program(&input, &known, today());
        assert_eq!(result.status_tag, StatusTag::Duplicate);
    }

    #[test]
    fn close_name_match_is_duplicate() {
        let known = [KnownProgram {
            program_name: "enterprise zone hiring credit",
            agency: "state revenue department",
            source_url: "https://state.gov/a",
        }];
        let input = ClassificationInput {
            program_name: "enterprise zone hiring credit",
            source_url: "https://state.gov/b",
            ..Default::default()
        };
        let result = classify_program(&input, &known, today());
        assert_eq!(result.status_tag, StatusTag::Duplicate);
    }

    #[test]
    fn federal_agency_keyword_tags_federal() {
        let input = ClassificationInput {
            program_name: "Some Credit",
            agency: "Internal Revenue Service",
            source_url: "https://irs.gov/credit",
            program_type: "tax_credit",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::Federal);
    }

    #[test]
    fn non_employer_program_is_non_incentive() {
        let input = ClassificationInput {
            program_name: "Resume Building Workshop",
            description: "Job search and resume help for participants",
            source_url: "https://state.gov/resume",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::NonIncentive);
        assert_eq!(result.benefit_type, BenefitType::JobSeekerOnly);
    }

    #[test]
    fn low_value_service_is_non_incentive() {
        let input = ClassificationInput {
            program_name: "State Job Board Service",
            description: "Free job posting and job board access for local employers",
            source_url: "https://state.gov/jobs",
            program_type: "service",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::NonIncentive);
    }

    #[test]
    fn cost_reducing_service_is_active() {
        let input = ClassificationInput {
            program_name: "Pre-Screened Candidate Program",
            description: "We provide pre-screened, job-ready candidates at no cost to employers",
            source_url: "https://state.gov/screening",
            program_type: "service",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::Active);
        assert!(result.reduces_employer_costs);
    }

    #[test]
    fn tax_credit_with_employer_benefit_is_active() {
        let input = ClassificationInput {
            program_name: "Small Business Hiring Tax Credit",
            description: "Employers may claim a credit against state tax liability",
            source_url: "https://state.gov/credit",
            max_value: "$2,000",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.status_tag, StatusTag::Active);
        assert_eq!(result.benefit_type, BenefitType::TaxCredit);
    }

    #[test]
    fn explicit_jurisdiction_is_respected() {
        let input = ClassificationInput {
            program_name: "Metro Jobs Credit",
            source_url: "https://metro.gov/credit",
            explicit_jurisdiction: Some("local"),
            program_type: "tax_credit",
            ..Default::default()
        };
        let result = classify_program(&input, &[], today());
        assert_eq!(result.jurisdiction, "local");
    }
}
