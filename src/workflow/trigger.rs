//! Matching activities against triggers and candidates against guards.

use chrono::{DateTime, Utc};

use crate::model::{Activity, ActivityKind, Candidate, Trigger, TriggerFilter};

/// If `activity` fires `trigger`, the anchor time step delays count from.
///
/// Time-based and manual triggers never match an activity.
pub fn match_activity(trigger: &Trigger, activity: &Activity) -> Option<DateTime<Utc>> {
    let at = activity.timestamp;
    match (trigger, &activity.kind) {
        (Trigger::StatusChanged { from, to }, ActivityKind::StatusChanged { from: f, to: t })
            if to.contains(t) && (from.is_empty() || from.contains(f)) =>
        {
            Some(at)
        }
        (Trigger::TagAdded { tags }, ActivityKind::TagAdded { tag }) if tags.contains(tag) => {
            Some(at)
        }
        (Trigger::TagRemoved { tags }, ActivityKind::TagRemoved { tag }) if tags.contains(tag) => {
            Some(at)
        }
        (
            Trigger::StageEntered { process_id, stages },
            ActivityKind::StageChanged {
                process_id: p, to, ..
            }
            | ActivityKind::AddedToProcess {
                process_id: p,
                stage_id: to,
            },
        ) if process_id.is_none_or(|id| id == *p) && stages.contains(to) => Some(at),
        (
            Trigger::ScoreThreshold { criterion, min },
            ActivityKind::ScoreUpdated {
                criterion: c,
                score,
                previous,
            },
        ) if criterion.as_ref().is_none_or(|want| want == c)
            && *score >= *min
            && previous.is_none_or(|p| p < *min) =>
        {
            Some(at)
        }
        (Trigger::InterviewScheduled, ActivityKind::InterviewScheduled { scheduled_at, .. }) => {
            Some(*scheduled_at)
        }
        (Trigger::SlaBreached { process_id }, ActivityKind::SlaBreached { process_id: p, .. })
            if process_id.is_none_or(|id| id == *p) =>
        {
            Some(at)
        }
        _ => None,
    }
}

/// Whether `candidate` passes the guard.
pub fn passes_filter(filter: &TriggerFilter, candidate: &Candidate) -> bool {
    if let Some(sources) = &filter.sources
        && !sources.contains(&candidate.source)
    {
        return false;
    }
    if let Some(levels) = &filter.experience_levels {
        match candidate.experience_level {
            Some(level) if levels.contains(&level) => {}
            _ => return false,
        }
    }
    filter.tags.iter().all(|tag| candidate.has_tag(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn activity(kind: ActivityKind) -> Activity {
        Activity::new(CandidateId::new(), Actor::System, kind)
    }

    #[test]
    fn status_trigger_respects_from_list() {
        let trigger = Trigger::StatusChanged {
            from: vec![CandidateStatus::New],
            to: vec![CandidateStatus::Contacted],
        };
        let hit = activity(ActivityKind::StatusChanged {
            from: CandidateStatus::New,
            to: CandidateStatus::Contacted,
        });
        let miss = activity(ActivityKind::StatusChanged {
            from: CandidateStatus::Rejected,
            to: CandidateStatus::Contacted,
        });
        assert!(match_activity(&trigger, &hit).is_some());
        assert!(match_activity(&trigger, &miss).is_none());
    }

    #[test]
    fn score_threshold_fires_only_on_crossing() {
        let trigger = Trigger::ScoreThreshold {
            criterion: Some("tech".into()),
            min: 4.0,
        };
        let crossing = activity(ActivityKind::ScoreUpdated {
            criterion: "tech".into(),
            score: 4.5,
            previous: Some(3.0),
        });
        let already_above = activity(ActivityKind::ScoreUpdated {
            criterion: "tech".into(),
            score: 4.8,
            previous: Some(4.5),
        });
        let other = activity(ActivityKind::ScoreUpdated {
            criterion: "culture".into(),
            score: 5.0,
            previous: None,
        });
        assert!(match_activity(&trigger, &crossing).is_some());
        assert!(match_activity(&trigger, &already_above).is_none());
        assert!(match_activity(&trigger, &other).is_none());
    }

    #[test]
    fn interview_trigger_anchors_on_scheduled_time() {
        let scheduled_at = Utc::now() + chrono::Duration::days(3);
        let a = activity(ActivityKind::InterviewScheduled {
            scheduled_at,
            interviewer: None,
        });
        assert_eq!(
            match_activity(&Trigger::InterviewScheduled, &a),
            Some(scheduled_at)
        );
    }

    #[test]
    fn time_based_triggers_never_match_activities() {
        let a = activity(ActivityKind::NoteAdded { text: "hi".into() });
        assert!(match_activity(&Trigger::NoActivity { days: 1 }, &a).is_none());
        assert!(match_activity(&Trigger::Manual, &a).is_none());
    }

    #[test]
    fn filter_requires_level_when_levels_are_listed() {
        let mut candidate =
            NewCandidate::new("Ada", "L", "ada@example.com").into_candidate(Utc::now());
        let filter = TriggerFilter {
            experience_levels: Some(vec![ExperienceLevel::Senior]),
            ..TriggerFilter::default()
        };
        assert!(!passes_filter(&filter, &candidate));
        candidate.experience_level = Some(ExperienceLevel::Senior);
        assert!(passes_filter(&filter, &candidate));
    }
}
