// ==========================================
// 供应链数据导入引擎 - 质量评分
// ==========================================
// 公式: score = 100 * valid / total - penalty
// penalty: 仅统计未自动解决的问题,warning=2 分,error=5 分
// 结果保留两位小数并截断到 [0, 100]; total=0 时得分为 0
// ==========================================

use crate::domain::types::Severity;
use crate::domain::upload::QualityIssue;

/// 未解决 warning 的扣分
pub const UNRESOLVED_WARNING_PENALTY: f64 = 2.0;

/// 未解决 error 的扣分
pub const UNRESOLVED_ERROR_PENALTY: f64 = 5.0;

fn penalty_of(issue: &QualityIssue) -> f64 {
    if issue.auto_resolved {
        return 0.0;
    }
    match issue.severity {
        Severity::Warning => UNRESOLVED_WARNING_PENALTY,
        Severity::Error => UNRESOLVED_ERROR_PENALTY,
    }
}

pub fn quality_score(total_rows: usize, valid_rows: usize, issues: &[QualityIssue]) -> f64 {
    if total_rows == 0 {
        return 0.0;
    }
    let base = 100.0 * valid_rows as f64 / total_rows as f64;
    let penalty: f64 = issues.iter().map(penalty_of).sum();
    let score = (base - penalty).clamp(0.0, 100.0);
    (score * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::IssueKind;

    fn issue(severity: Severity, auto_resolved: bool) -> QualityIssue {
        QualityIssue {
            kind: IssueKind::FutureDate,
            severity,
            column: None,
            affected_row_indices: vec![0],
            auto_resolved,
            resolution_description: String::new(),
        }
    }

    #[test]
    fn test_zero_rows_scores_zero() {
        assert_eq!(quality_score(0, 0, &[]), 0.0);
    }

    #[test]
    fn test_auto_resolved_issues_cost_nothing() {
        let issues = vec![issue(Severity::Error, true), issue(Severity::Warning, true)];
        assert_eq!(quality_score(10, 8, &issues), 80.0);
    }

    #[test]
    fn test_unresolved_penalties() {
        assert_eq!(quality_score(10, 10, &[issue(Severity::Warning, false)]), 98.0);
        assert_eq!(quality_score(10, 10, &[issue(Severity::Error, false)]), 95.0);
    }

    #[test]
    fn test_score_monotonicity() {
        let clean = quality_score(7, 5, &[]);
        let flagged = quality_score(7, 5, &[issue(Severity::Warning, false)]);
        assert!(clean >= flagged);
    }

    #[test]
    fn test_clamped_and_rounded() {
        let many: Vec<_> = (0..60).map(|_| issue(Severity::Error, false)).collect();
        assert_eq!(quality_score(3, 1, &many), 0.0);
        assert_eq!(quality_score(3, 2, &[]), 66.67);
    }
}
