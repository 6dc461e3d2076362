//! Canonical career-ladder ordering for the level dimension.
//!
//! Levels are stored as e.g. "Entry (P1)" or "Manager (M3)"; ranking goes by
//! name prefix so code suffixes and minor variants sort consistently. The
//! ladder interleaves professional and management tracks in pay-progression
//! order. Unknown levels (roll-ups, executive bands, new codes) sort last.

/// Ladder prefixes in ascending pay-progression order.
const LADDER: &[&str] = &[
    "Entry",
    "Developing",
    "Career",
    "Advanced",
    "Manager (M3)",
    "Expert",
    "Sr Manager",
    "Director",
    "Principal",
    "Senior Director",
];

/// Rank assigned to levels outside the standard ladder.
pub const UNRANKED: u8 = 99;

/// Rank of a level name on the career ladder (1-based); `UNRANKED` if the
/// name matches no ladder prefix.
pub fn level_rank(level: &str) -> u8 {
    for (i, prefix) in LADDER.iter().enumerate() {
        if level.starts_with(prefix) {
            return (i + 1) as u8;
        }
    }
    UNRANKED
}

/// SQL `CASE` expression ranking `column` by the career ladder, for use in
/// ORDER BY clauses.
pub fn order_case_sql(column: &str) -> String {
    let mut sql = String::from("CASE ");
    for (i, prefix) in LADDER.iter().enumerate() {
        sql.push_str(&format!("WHEN {} LIKE '{}%' THEN {} ", column, prefix, i + 1));
    }
    sql.push_str(&format!("ELSE {} END", UNRANKED));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_rank_ladder() {
        assert_eq!(level_rank("Entry (P1)"), 1);
        assert_eq!(level_rank("Developing (P2)"), 2);
        assert_eq!(level_rank("Career (P3)"), 3);
        assert_eq!(level_rank("Advanced (P4)"), 4);
        assert_eq!(level_rank("Manager (M3)"), 5);
        assert_eq!(level_rank("Expert (P5)"), 6);
        assert_eq!(level_rank("Sr Manager (M4)"), 7);
        assert_eq!(level_rank("Director (M5)"), 8);
        assert_eq!(level_rank("Principal (P6)"), 9);
        assert_eq!(level_rank("Senior Director (M6)"), 10);
    }

    #[test]
    fn test_level_rank_unknown_sorts_last() {
        assert_eq!(level_rank("Function Roll-Up"), UNRANKED);
        assert_eq!(level_rank("Executive Band"), UNRANKED);
        assert!(level_rank("Entry (P1)") < level_rank("Executive Band"));
    }

    #[test]
    fn test_senior_director_not_confused_with_director() {
        assert_eq!(level_rank("Senior Director (M6)"), 10);
        assert_eq!(level_rank("Director (M5)"), 8);
    }

    #[test]
    fn test_order_case_sql_shape() {
        let sql = order_case_sql("jp.job_level");
        assert!(sql.starts_with("CASE WHEN jp.job_level LIKE 'Entry%' THEN 1"));
        assert!(sql.ends_with("ELSE 99 END"));
        assert!(sql.contains("WHEN jp.job_level LIKE 'Senior Director%' THEN 10"));
    }
}
