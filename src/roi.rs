//! Bounded iterative ROI refinement: analyze shortlisted programs, generate
//! clarifying questions, accept answers, recompute, and decide whether another
//! round is warranted.
//!
//! The cycle is a state machine with an explicit round counter rather than
//! recursion, so termination is guaranteed independent of LLM behavior — a
//! program that never gets a satisfying answer simply blocks completion until
//! `max_rounds` forces an exit.

use crate::extractor::LlmClient;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn dollar_figure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$?([\d,]+)").unwrap())
}

#[derive(Debug, Clone)]
pub struct ShortlistedProgram {
    pub id: String,
    pub program_name: String,
    pub benefit_type: String,
    pub max_value: String,
    pub target_populations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoiCalculation {
    pub program_id: String,
    pub program_name: String,
    pub estimated_value_per_hire: String,
    pub qualification_rate: String,
    pub complexity: String,
    pub time_to_benefit: String,
    pub confidence: String,
    pub needs_more_info: Vec<String>,
    pub needs_refinement: bool,
    pub error: Option<String>,
    pub refined_total_roi: Option<String>,
    pub num_hires_used: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiQuestion {
    pub program_id: String,
    pub question_id: String,
    pub question: String,
    pub question_type: &'static str,
    pub required: bool,
}

#[derive(Debug, serde::Deserialize, Default)]
struct RawAnalysis {
    #[serde(default)]
    estimated_value_per_hire: String,
    #[serde(default)]
    qualification_rate: String,
    #[serde(default)]
    complexity: String,
    #[serde(default)]
    time_to_benefit: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    needs_more_info: Vec<String>,
}

fn build_prompt(program: &ShortlistedProgram, previous_answers: &str) -> String {
    format!(
        "You are an ROI analyst for employer hiring incentive programs.\n\n\
Analyze this program and estimate potential ROI:\n\
- Program: {}\n\
- Benefit Type: {}\n\
- Max Value: {}\n\
- Target Populations: {}\n\n\
Previous answers (if any): {previous_answers}\n\n\
Calculate:\n\
1. Estimated value per hire (range)\n\
2. Typical qualification rate\n\
3. Administrative complexity (low/medium/high)\n\
4. Time to receive benefit\n\n\
Return JSON:\n\
{{\"estimated_value_per_hire\": \"$X - $Y\", \"qualification_rate\": \"X%\", \
\"complexity\": \"low|medium|high\", \"time_to_benefit\": \"X weeks/months\", \
\"confidence\": \"high|medium|low\", \"needs_more_info\": [\"list of info needed for refinement\"]}}",
        program.program_name,
        program.benefit_type,
        program.max_value,
        program.target_populations.join(", "),
    )
}

/// Analyze a single shortlisted program via the LLM. A parse or request failure
/// is recorded on that program's calculation rather than propagated, so one bad
/// program never aborts the round for the others.
async fn analyze_one(llm: &dyn LlmClient, program: &ShortlistedProgram, previous_answers: &str) -> RoiCalculation {
    let prompt = build_prompt(program, previous_answers);
    match llm.complete("", &prompt).await {
        Ok(text) => {
            let cleaned = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```");
            match serde_json::from_str::<RawAnalysis>(cleaned.trim()) {
                Ok(raw) => RoiCalculation {
                    program_id: program.id.clone(),
                    program_name: program.program_name.clone(),
                    needs_refinement: !raw.needs_more_info.is_empty(),
                    estimated_value_per_hire: raw.estimated_value_per_hire,
                    qualification_rate: raw.qualification_rate,
                    complexity: raw.complexity,
                    time_to_benefit: raw.time_to_benefit,
                    confidence: raw.confidence,
                    needs_more_info: raw.needs_more_info,
                    ..Default::default()
                },
                Err(e) => RoiCalculation {
                    program_id: program.id.clone(),
                    program_name: program.program_name.clone(),
                    error: Some(e.to_string()),
                    needs_refinement: true,
                    ..Default::default()
                },
            }
        }
        Err(e) => RoiCalculation {
            program_id: program.id.clone(),
            program_name: program.program_name.clone(),
            error: Some(e.to_string()),
            needs_refinement: true,
            ..Default::default()
        },
    }
}

/// Analyze every shortlisted program, scoping each one's "previous answers" view
/// to the keys that start with its own program id.
pub async fn analyze_round(
    llm: &dyn LlmClient,
    programs: &[ShortlistedProgram],
    roi_answers: &HashMap<String, String>,
) -> Vec<RoiCalculation> {
    let mut calculations = Vec::with_capacity(programs.len());
    for program in programs {
        let prog_answers: HashMap<&String, &String> =
            roi_answers.iter().filter(|(k, _)| k.starts_with(&program.id)).collect();
        let previous = format!("{prog_answers:?}");
        calculations.push(analyze_one(llm, program, &previous).await);
    }
    calculations
}

/// For every calculation still needing refinement, turn each `needs_more_info`
/// entry into a typed question; emit one generic question if the list is empty.
pub fn generate_questions(calculations: &[RoiCalculation]) -> Vec<RoiQuestion> {
    let mut questions = Vec::new();

    for calc in calculations {
        if !calc.needs_refinement {
            continue;
        }
        let prog_id = &calc.program_id;
        let prog_name = &calc.program_name;

        if calc.needs_more_info.is_empty() {
            questions.push(RoiQuestion {
                program_id: prog_id.clone(),
                question_id: format!("{prog_id}_general"),
                question: format!("For {prog_name}: How many employees do you expect to hire who qualify for this program?"),
                question_type: "number",
                required: true,
            });
            continue;
        }

        for info in &calc.needs_more_info {
            let lower = info.to_lowercase();
            if lower.contains("hire") || lower.contains("employee") {
                questions.push(RoiQuestion {
                    program_id: prog_id.clone(),
                    question_id: format!("{prog_id}_num_hires"),
                    question: format!("For {prog_name}: How many employees from target populations do you plan to hire in the next 12 months?"),
                    question_type: "number",
                    required: true,
                });
            } else if lower.contains("wage") || lower.contains("salary") {
                questions.push(RoiQuestion {
                    program_id: prog_id.clone(),
                    question_id: format!("{prog_id}_avg_wage"),
                    question: format!("For {prog_name}: What is the average hourly wage for these positions?"),
                    question_type: "currency",
                    required: true,
                });
            } else if lower.contains("retention") {
                questions.push(RoiQuestion {
                    program_id: prog_id.clone(),
                    question_id: format!("{prog_id}_retention"),
                    question: format!("For {prog_name}: What is your expected employee retention rate after 6 months?"),
                    question_type: "percentage",
                    required: false,
                });
            }
        }
    }

    questions
}

/// Average every dollar figure matched in `text`, stripping commas and an
/// optional leading `$`. Returns `None` if nothing matched.
fn mean_dollar_figure(text: &str) -> Option<f64> {
    let values: Vec<f64> = dollar_figure_pattern()
        .captures_iter(text)
        .filter_map(|c| c[1].replace(',', "").parse::<f64>().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn format_whole_dollars(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let grouped: String = grouped.chars().rev().collect();
    if rounded < 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

pub struct RefinementOutcome {
    pub calculations: Vec<RoiCalculation>,
    pub round_num: u32,
    pub is_complete: bool,
}

/// Apply `roi_answers` to the current calculations, recompute totals for
/// answered programs, and decide whether the cycle is done.
pub fn refine(
    calculations: Vec<RoiCalculation>,
    roi_answers: &HashMap<String, String>,
    refinement_round: u32,
    max_rounds: u32,
) -> RefinementOutcome {
    let mut all_complete = true;
    let mut refined = Vec::with_capacity(calculations.len());

    for calc in calculations {
        let prog_id = calc.program_id.clone();
        let prog_answers: HashMap<String, &String> =
            roi_answers.iter().filter(|(k, _)| k.contains(&prog_id)).map(|(k, v)| (k.clone(), v)).collect();

        if !prog_answers.is_empty() {
            let num_hires: u32 = prog_answers
                .get(&format!("{prog_id}_num_hires"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            let avg_value = mean_dollar_figure(&calc.estimated_value_per_hire).unwrap_or(0.0);
            let total_roi = if num_hires > 0 { avg_value * num_hires as f64 } else { 0.0 };

            refined.push(RoiCalculation {
                refined_total_roi: Some(format_whole_dollars(total_roi)),
                num_hires_used: Some(num_hires),
                needs_refinement: false,
                ..calc
            });
        } else {
            if calc.needs_refinement {
                all_complete = false;
            }
            refined.push(calc);
        }
    }

    let round_num = refinement_round + 1;
    let is_complete = all_complete || round_num >= max_rounds;

    RefinementOutcome { calculations: refined, round_num, is_complete }
}

/// Named, tunable heuristics used when a renderer needs a single per-hire dollar
/// figure derived from a program's raw `max_value` string rather than from the
/// LLM's own `estimated_value_per_hire` range. These are product judgment calls,
/// not derived constants — retune freely without touching control flow.
pub mod value_heuristics {
    /// Substrings in a `max_value` string that indicate a non-cash benefit
    /// (bonding/insurance-style), which this calculator values at 0.
    pub const NON_MONETARY_INDICATORS: &[&str] = &["bond", "fidelity", "coverage", "capital", "varies"];

    /// Assumed hours per year when estimating a withholding-style credit from an
    /// hourly wage (40 hrs/week * 52 weeks).
    pub const WITHHOLDING_ANNUAL_HOURS: f64 = 40.0 * 52.0;
    /// Fraction of annual wages assumed recoverable as a withholding credit.
    pub const WITHHOLDING_RATE: f64 = 0.04;
    pub const WITHHOLDING_CAP: f64 = 3000.0;

    pub const GENERIC_CAP: f64 = 20000.0;
    pub const GENERIC_CAP_DEMO_MODE: f64 = 15000.0;

    pub const FLOOR_TAX_CREDIT: f64 = 2000.0;
    pub const FLOOR_WAGE_SUBSIDY: f64 = 3000.0;
    pub const FLOOR_TRAINING_GRANT: f64 = 1500.0;
    pub const FLOOR_OTHER: f64 = 1000.0;
}

/// Derive a single per-hire dollar estimate from a program's raw `max_value`
/// string and benefit type, applying the special parsing rules: non-monetary
/// benefits value at 0, withholding-style credits estimate from wage × hours ×
/// rate (capped), everything else averages the parsed dollar figures (capped),
/// and known benefit types floor a zero result rather than reporting it as $0.
pub fn estimate_per_hire_value(max_value: &str, benefit_type: &str, avg_wage: Option<f64>, demo_mode: bool) -> f64 {
    use value_heuristics::*;

    let lower = max_value.to_lowercase();

    let raw_estimate = if NON_MONETARY_INDICATORS.iter().any(|i| lower.contains(i)) {
        0.0
    } else if lower.contains("withholding") || lower.contains("withholdings") {
        let wage = avg_wage.unwrap_or(0.0);
        (wage * WITHHOLDING_ANNUAL_HOURS * WITHHOLDING_RATE).min(WITHHOLDING_CAP)
    } else {
        let cap = if demo_mode { GENERIC_CAP_DEMO_MODE } else { GENERIC_CAP };
        mean_dollar_figure(max_value).unwrap_or(0.0).min(cap)
    };

    if raw_estimate > 0.0 {
        return raw_estimate;
    }

    match benefit_type {
        "tax_credit" => FLOOR_TAX_CREDIT,
        "wage_subsidy" => FLOOR_WAGE_SUBSIDY,
        "training_grant" => FLOOR_TRAINING_GRANT,
        _ => FLOOR_OTHER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticLlm(&'static str);

    #[async_trait]
    impl LlmClient for StaticLlm {
        async fn complete(&self, _system: &str, _user: &str) -> crate::extractor::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn program(id: &str) -> ShortlistedProgram {
        ShortlistedProgram {
            id: id.to_string(),
            program_name: "Work Opportunity Tax Credit".to_string(),
            benefit_type: "tax_credit".to_string(),
            max_value: "$2,400 - $9,600 per hire".to_string(),
            target_populations: vec!["veterans".to_string()],
        }
    }

    #[tokio::test]
    async fn analyze_round_parses_llm_json() {
        let llm = StaticLlm(
            r#"{"estimated_value_per_hire":"$2400 - $9600","qualification_rate":"40%","complexity":"medium","time_to_benefit":"6 months","confidence":"high","needs_more_info":["number of hires"]}"#,
        );
        let calcs = analyze_round(&llm, &[program("p1")], &HashMap::new()).await;
        assert_eq!(calcs.len(), 1);
        assert!(calcs[0].needs_refinement);
        assert_eq!(calcs[0].needs_more_info.len(), 1);
    }

    #[test]
    fn generate_questions_maps_keywords_to_types() {
        let calc = RoiCalculation {
            program_id: "p1".to_string(),
            program_name: "WOTC".to_string(),
            needs_refinement: true,
            needs_more_info: vec!["number of hires".to_string(), "average wage".to_string(), "retention estimate".to_string()],
            ..Default::default()
        };
        let questions = generate_questions(&[calc]);
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0].question_type, "number");
        assert!(questions[0].required);
        assert_eq!(questions[1].question_type, "currency");
        assert_eq!(questions[2].question_type, "percentage");
        assert!(!questions[2].required);
    }

    #[test]
    fn generate_questions_emits_generic_when_no_specific_gap() {
        let calc = RoiCalculation {
            program_id: "p1".to_string(),
            program_name: "WOTC".to_string(),
            needs_refinement: true,
            ..Default::default()
        };
        let questions = generate_questions(&[calc]);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question_id, "p1_general");
    }

    #[test]
    fn refine_computes_total_from_answers() {
        let calc = RoiCalculation {
            program_id: "p1".to_string(),
            program_name: "WOTC".to_string(),
            estimated_value_per_hire: "$2,400 - $9,600 per hire".to_string(),
            needs_refinement: true,
            ..Default::default()
        };
        let mut answers = HashMap::new();
        answers.insert("p1_num_hires".to_string(), "5".to_string());
        let outcome = refine(vec![calc], &answers, 0, 3);
        assert!(outcome.is_complete);
        assert_eq!(outcome.calculations[0].refined_total_roi.as_deref(), Some("$30,000"));
        assert_eq!(outcome.calculations[0].num_hires_used, Some(5));
    }

    #[test]
    fn refine_zero_hires_yields_zero_roi_without_erroring() {
        let calc = RoiCalculation {
            program_id: "p1".to_string(),
            estimated_value_per_hire: "$2,400 - $9,600".to_string(),
            needs_refinement: true,
            ..Default::default()
        };
        let mut answers = HashMap::new();
        answers.insert("p1_num_hires".to_string(), "0".to_string());
        let outcome = refine(vec![calc], &answers, 0, 3);
        assert_eq!(outcome.calculations[0].refined_total_roi.as_deref(), Some("$0"));
    }

    #[test]
    fn refine_unanswered_program_blocks_completion_until_max_rounds() {
        let calc = RoiCalculation {
            program_id: "p1".to_string(),
            needs_refinement: true,
            ..Default::default()
        };
        let outcome = refine(vec![calc], &HashMap::new(), 0, 3);
        assert!(!outcome.is_complete);
        assert_eq!(outcome.round_num, 1);
    }

    #[test]
    fn refine_forces_completion_at_max_rounds() {
        let calc = RoiCalculation {
            program_id: "p1".to_string(),
            needs_refinement: true,
            ..Default::default()
        };
        let outcome = refine(vec![calc], &HashMap::new(), 2, 3);
        assert!(outcome.is_complete);
        assert_eq!(outcome.round_num, 3);
    }

    #[test]
    fn non_monetary_benefit_values_at_floor() {
        let value = estimate_per_hire_value("fidelity bond up to $25,000", "bonding", None, false);
        assert_eq!(value, value_heuristics::FLOOR_OTHER);
    }

    #[test]
    fn withholding_credit_estimated_from_wage_and_capped() {
        let value = estimate_per_hire_value("multi-year withholding credit", "tax_credit", Some(50.0), false);
        assert_eq!(value, value_heuristics::WITHHOLDING_CAP);
    }

    #[test]
    fn generic_dollar_figures_averaged_and_capped() {
        let value = estimate_per_hire_value("$50,000 - $60,000", "tax_credit", None, false);
        assert_eq!(value, value_heuristics::GENERIC_CAP);
    }

    #[test]
    fn demo_mode_uses_lower_cap() {
        let value = estimate_per_hire_value("$50,000 - $60,000", "wage_subsidy", None, true);
        assert_eq!(value, value_heuristics::GENERIC_CAP_DEMO_MODE);
    }

    #[test]
    fn zero_result_floors_by_benefit_type() {
        assert_eq!(estimate_per_hire_value("varies", "wage_subsidy", None, false), value_heuristics::FLOOR_WAGE_SUBSIDY);
        assert_eq!(estimate_per_hire_value("varies", "training_grant", None, false), value_heuristics::FLOOR_TRAINING_GRANT);
    }

    #[test]
    fn mean_dollar_figure_averages_all_matches_not_just_endpoints() {
        assert_eq!(mean_dollar_figure("$100, $200, $300"), Some(200.0));
    }
}
