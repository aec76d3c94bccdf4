//! Cross-worker deduplication and per-program validation.
//!
//! Discovery workers run independently per government level and can't see each
//! other's output, so the same program sometimes surfaces twice with slightly
//! different wording. The join stage merges those near-duplicates — guarded to the
//! same government level, since a state program and a federal program sharing a
//! name are not the same program — before the validator flags data-quality issues
//! for the admin/shortlist branch.

use crate::cache::{Confidence, NewProgram};
use crate::identity::{normalize_program_name, token_set_ratio};

/// Minimum token-set-ratio score for two same-level programs to be treated as
/// duplicates during the join. Deliberately higher than the cache's match
/// threshold (80) — joining merges exact restatements of one find, while the
/// cache also wants to catch looser name variants across separate runs.
pub const JOIN_MATCH_THRESHOLD: f64 = 90.0;

/// A program carrying its originating government level and cache identity, as
/// produced by a discovery worker before the join stage merges duplicates.
///
/// `cache_key` is whatever [`crate::worker::discover`] already resolved the
/// program to — a fuzzy-matched existing row's key, or a freshly minted one —
/// so downstream stages never have to recompute an id from scratch (and never
/// from a human-readable field like `jurisdiction`, which isn't the id input).
#[derive(Debug, Clone)]
pub struct LeveledProgram {
    pub program: NewProgram,
    pub government_level: String,
    pub cache_key: String,
}

/// Merge same-level near-duplicate programs, keeping the richer record on a tie.
pub fn join_programs(programs: Vec<LeveledProgram>) -> Vec<LeveledProgram> {
    let mut unique: Vec<LeveledProgram> = Vec::new();

    for candidate in programs {
        let name = normalize_program_name(&candidate.program.program_name);
        if name.is_empty() {
            continue;
        }

        let mut matched_index = None;
        for (i, existing) in unique.iter().enumerate() {
            if existing.government_level != candidate.government_level {
                continue;
            }
            let existing_name = normalize_program_name(&existing.program.program_name);
            if token_set_ratio(&name, &existing_name) >= JOIN_MATCH_THRESHOLD {
                matched_index = Some(i);
                break;
            }
        }

        match matched_index {
            Some(i) => {
                if should_replace(&unique[i].program, &candidate.program) {
                    unique[i] = candidate;
                }
            }
            None => unique.push(candidate),
        }
    }

    unique
}

fn confidence_rank(c: Confidence) -> u8 {
    match c {
        Confidence::High => 3,
        Confidence::Medium => 2,
        Confidence::Low => 1,
    }
}

/// Prefer higher confidence; on a tie, prefer the longer description.
fn should_replace(existing: &NewProgram, candidate: &NewProgram) -> bool {
    let existing_rank = confidence_rank(existing.confidence);
    let candidate_rank = confidence_rank(candidate.confidence);
    if candidate_rank != existing_rank {
        return candidate_rank > existing_rank;
    }
    candidate.description.len() > existing.description.len()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub program: String,
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedProgram {
    pub program: LeveledProgram,
    pub validated: bool,
    pub validation_errors: Vec<ValidationError>,
}

/// Flag per-program data-quality issues: missing source URL, low confidence
/// (likely hallucination or stale info), and missing required fields.
pub fn check_errors(merged: Vec<LeveledProgram>) -> (Vec<ValidatedProgram>, Vec<ValidationError>) {
    let mut all_errors = Vec::new();
    let mut validated_programs = Vec::new();

    for leveled in merged {
        let program = &leveled.program;
        let label = if program.program_name.is_empty() {
            "Unknown".to_string()
        } else {
            program.program_name.clone()
        };
        let mut program_errors = Vec::new();

        if program.source_url.trim().is_empty() {
            program_errors.push(ValidationError {
                program: label.clone(),
                error_type: "missing_url".to_string(),
                message: "No source URL provided".to_string(),
            });
        }

        if program.confidence == Confidence::Low {
            program_errors.push(ValidationError {
                program: label.clone(),
                error_type: "low_confidence".to_string(),
                message: "Program may be hallucinated or outdated".to_string(),
            });
        }

        if program.program_name.trim().is_empty() {
            program_errors.push(ValidationError {
                program: label.clone(),
                error_type: "missing_program_name".to_string(),
                message: "Missing required field: program_name".to_string(),
            });
        }
        if program.agency.trim().is_empty() {
            program_errors.push(ValidationError {
                program: label.clone(),
                error_type: "missing_agency".to_string(),
                message: "Missing required field: agency".to_string(),
            });
        }
        if program.benefit_type.trim().is_empty() {
            program_errors.push(ValidationError {
                program: label.clone(),
                error_type: "missing_benefit_type".to_string(),
                message: "Missing required field: benefit_type".to_string(),
            });
        }

        let validated = program_errors.is_empty();
        all_errors.extend(program_errors.clone());
        validated_programs.push(ValidatedProgram {
            program: leveled,
            validated,
            validation_errors: program_errors,
        });
    }

    (validated_programs, all_errors)
}

/// Programs eligible for the shortlist: either fully validated, or at least
/// medium confidence even with a flagged issue.
pub fn shortlist_candidates(validated: &[ValidatedProgram]) -> Vec<&ValidatedProgram> {
    validated
        .iter()
        .filter(|v| v.validated || matches!(v.program.program.confidence, Confidence::High | Confidence::Medium))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(name: &str, level: &str, confidence: Confidence, description: &str) -> LeveledProgram {
        LeveledProgram {
            program: NewProgram {
                program_name: name.to_string(),
                agency: "Some Agency".to_string(),
                benefit_type: "tax_credit".to_string(),
                description: description.to_string(),
                confidence,
                source_url: "https://example.gov".to_string(),
                ..Default::default()
            },
            government_level: level.to_string(),
            cache_key: format!("{level}-{}", normalize_program_name(name)),
        }
    }

    #[test]
    fn merges_same_level_near_duplicates() {
        let programs = vec![
            program("Work Opportunity Tax Credit", "federal", Confidence::Low, "short"),
            program("Work Opportunity Tax Credit (WOTC)", "federal", Confidence::High, "longer description"),
        ];
        let joined = join_programs(programs);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].program.confidence, Confidence::High);
    }

    #[test]
    fn merge_winner_carries_its_own_cache_key_forward() {
        let programs = vec![
            program("WOTC", "federal", Confidence::Low, "short"),
            program("WOTC (Work Opportunity Tax Credit)", "federal", Confidence::High, "longer"),
        ];
        let winner_key = programs[1].cache_key.clone();
        let joined = join_programs(programs);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].cache_key, winner_key);
    }

    #[test]
    fn does_not_merge_same_name_across_different_levels() {
        let programs = vec![
            program("Enterprise Zone Credit", "state", Confidence::High, ""),
            program("Enterprise Zone Credit", "city", Confidence::High, ""),
        ];
        let joined = join_programs(programs);
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn tie_confidence_prefers_longer_description() {
        let programs = vec![
            program("WOTC", "federal", Confidence::High, "short"),
            program("WOTC", "federal", Confidence::High, "a much longer description of the program"),
        ];
        let joined = join_programs(programs);
        assert_eq!(joined.len(), 1);
        assert!(joined[0].program.description.len() > 5);
    }

    #[test]
    fn distinct_programs_are_not_merged() {
        let programs = vec![
            program("Work Opportunity Tax Credit", "federal", Confidence::High, ""),
            program("Federal Bonding Program", "federal", Confidence::High, ""),
        ];
        let joined = join_programs(programs);
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn flags_missing_url_and_low_confidence() {
        let mut p = program("X", "state", Confidence::Low, "");
        p.program.source_url = String::new();
        let (validated, errors) = check_errors(vec![p]);
        assert!(!validated[0].validated);
        assert!(errors.iter().any(|e| e.error_type == "missing_url"));
        assert!(errors.iter().any(|e| e.error_type == "low_confidence"));
    }

    #[test]
    fn flags_missing_required_fields() {
        let mut p = program("X", "state", Confidence::High, "");
        p.program.agency = String::new();
        p.program.benefit_type = String::new();
        let (validated, _errors) = check_errors(vec![p]);
        assert!(!validated[0].validated);
        assert_eq!(validated[0].validation_errors.len(), 2);
    }

    #[test]
    fn fully_valid_program_has_no_errors() {
        let p = program("X", "state", Confidence::High, "desc");
        let (validated, errors) = check_errors(vec![p]);
        assert!(validated[0].validated);
        assert!(errors.is_empty());
    }

    #[test]
    fn shortlist_includes_validated_and_medium_or_high_confidence() {
        let validated = vec![
            ValidatedProgram {
                program: program("A", "state", Confidence::Low, ""),
                validated: true,
                validation_errors: vec![],
            },
            ValidatedProgram {
                program: program("B", "state", Confidence::Medium, ""),
                validated: false,
                validation_errors: vec![ValidationError {
                    program: "B".to_string(),
                    error_type: "missing_url".to_string(),
                    message: "m".to_string(),
                }],
            },
            ValidatedProgram {
                program: program("C", "state", Confidence::Low, ""),
                validated: false,
                validation_errors: vec![ValidationError {
                    program: "C".to_string(),
                    error_type: "low_confidence".to_string(),
                    message: "m".to_string(),
                }],
            },
        ];
        let shortlist = shortlist_candidates(&validated);
        assert_eq!(shortlist.len(), 2);
    }
}
