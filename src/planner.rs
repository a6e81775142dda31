//! Bucketed snapshot aging.
//!
//! Pure function from (schema, candidate snapshots, reference instant,
//! clean policy) to a keep set and a destroy set. The engine owns every
//! side effect; this module never touches ZFS.
//!
//! Bucket layout: intervals are laid out walking backwards from the
//! midnight that closes the reference day, one contiguous run per unit
//! in schema order. The first day-sized intervals therefore cover
//! "today", "yesterday", and so on. Each interval is half-open at its
//! older edge — `(floor, ceiling]` — so a snapshot created exactly on a
//! boundary belongs to the older bucket, and one created exactly on the
//! oldest floor has aged out entirely.
//!
//! Within a bucket the oldest snapshot survives; that way a survivor
//! rolls from bucket to bucket as the schema window slides, instead of
//! being re-evaluated out of existence at bucket edges. `k` buckets
//! ("keep days") never destroy anything.

use chrono::{Days, NaiveDateTime, NaiveTime};

use crate::schema::{Schema, Unit};

/// One snapshot as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub creation: NaiveDateTime,
    /// Name matches a managed convention. Foreign snapshots are only
    /// destroyed under `clean_all`.
    pub managed: bool,
}

impl Candidate {
    pub fn new(name: impl Into<String>, creation: NaiveDateTime, managed: bool) -> Self {
        Self {
            name: name.into(),
            creation,
            managed,
        }
    }
}

/// Planner verdict. `keep` and `destroy` partition the input; `destroy`
/// is ordered oldest first, which is the order the engine issues the
/// `zfs destroy` calls in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgingPlan {
    pub keep: Vec<Candidate>,
    pub destroy: Vec<Candidate>,
}

pub fn plan(
    schema: &Schema,
    candidates: &[Candidate],
    now: NaiveDateTime,
    clean_all: bool,
) -> AgingPlan {
    // Midnight closing the reference day: the newest bucket ceiling.
    let origin = now
        .date()
        .checked_add_days(Days::new(1))
        .unwrap_or(now.date())
        .and_time(NaiveTime::MIN);

    // Bucket floors, newest bucket first. Bucket i spans
    // (floors[i], previous floor], with `origin` closing bucket 0.
    let mut floors = Vec::new();
    let mut keep_all = Vec::new();
    let mut cursor = origin;
    for (unit, count) in schema.units() {
        for _ in 0..count {
            cursor -= unit.length();
            floors.push(cursor);
            keep_all.push(unit == Unit::Keep);
        }
    }

    let mut fresh = Vec::new();
    let mut expired = Vec::new();
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); floors.len()];
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.creation > origin {
            fresh.push(index);
            continue;
        }
        match floors.iter().position(|floor| candidate.creation > *floor) {
            Some(bucket) => buckets[bucket].push(index),
            None => expired.push(index),
        }
    }

    let mut keep = Vec::new();
    let mut destroy = Vec::new();
    keep.extend(fresh);
    for (bucket, members) in buckets.into_iter().enumerate() {
        if keep_all[bucket] || members.len() <= 1 {
            keep.extend(members);
            continue;
        }
        let oldest = members
            .iter()
            .copied()
            .min_by_key(|&i| (candidates[i].creation, candidates[i].name.clone()));
        for index in members {
            if Some(index) == oldest {
                keep.push(index);
            } else {
                destroy.push(index);
            }
        }
    }
    destroy.extend(expired);

    // Foreign snapshots are never destroyed unless clean_all is set.
    if !clean_all {
        let (foreign, managed): (Vec<_>, Vec<_>) =
            destroy.into_iter().partition(|&i| !candidates[i].managed);
        destroy = managed;
        keep.extend(foreign);
    }

    let by_age = |&i: &usize| (candidates[i].creation, candidates[i].name.clone());
    keep.sort_by_key(by_age);
    destroy.sort_by_key(by_age);
    AgingPlan {
        keep: keep.into_iter().map(|i| candidates[i].clone()).collect(),
        destroy: destroy.into_iter().map(|i| candidates[i].clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::name;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn managed(creation: NaiveDateTime) -> Candidate {
        Candidate::new(name::format_stamp(creation), creation, true)
    }

    fn schema(s: &str) -> Schema {
        s.parse().unwrap()
    }

    fn names(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn keep_and_destroy_partition_the_input() {
        let now = at(2024, 6, 15, 10, 30);
        let candidates: Vec<_> = (0..40)
            .map(|i| managed(now - chrono::Duration::hours(i * 7)))
            .collect();
        let plan = plan(&schema("1k12h5d2w"), &candidates, now, true);
        assert_eq!(plan.keep.len() + plan.destroy.len(), candidates.len());
        for c in &candidates {
            let kept = plan.keep.contains(c);
            let destroyed = plan.destroy.contains(c);
            assert!(kept ^ destroyed, "{} must be in exactly one set", c.name);
        }
    }

    #[test]
    fn empty_input_destroys_nothing() {
        let plan = plan(&schema("7d3w"), &[], at(2024, 6, 15, 10, 30), false);
        assert!(plan.keep.is_empty());
        assert!(plan.destroy.is_empty());
    }

    #[test]
    fn zero_schema_destroys_every_managed_snapshot_older_than_now() {
        let now = at(2024, 6, 15, 10, 30);
        let candidates = vec![
            managed(at(2024, 6, 15, 9, 0)),
            managed(at(2024, 6, 1, 0, 0)),
            managed(at(2020, 1, 1, 0, 0)),
        ];
        let plan = plan(&schema("0k0h0d0w0m0y"), &candidates, now, false);
        assert_eq!(plan.destroy.len(), 3);
        assert!(plan.keep.is_empty());
    }

    #[test]
    fn foreign_snapshots_survive_without_clean_all() {
        let now = at(2024, 6, 15, 10, 30);
        let candidates = vec![
            Candidate::new("manual-before-migration", at(2019, 3, 1, 12, 0), false),
            managed(at(2019, 3, 1, 13, 0)),
        ];
        let result = plan(&schema("7d"), &candidates, now, false);
        assert_eq!(names(&result.keep), vec!["manual-before-migration"]);
        assert_eq!(names(&result.destroy), vec!["201903011300"]);

        let plan_all = plan(&schema("7d"), &candidates, now, true);
        assert_eq!(plan_all.destroy.len(), 2);
    }

    #[test]
    fn each_bucket_keeps_its_oldest() {
        let now = at(2024, 6, 15, 10, 30);
        // Three snapshots inside the same day bucket (June 14th).
        let candidates = vec![
            managed(at(2024, 6, 14, 6, 0)),
            managed(at(2024, 6, 14, 12, 0)),
            managed(at(2024, 6, 14, 18, 0)),
        ];
        let plan = plan(&schema("7d"), &candidates, now, false);
        assert_eq!(names(&plan.keep), vec!["202406140600"]);
        assert_eq!(names(&plan.destroy), vec!["202406141200", "202406141800"]);
    }

    #[test]
    fn keep_days_never_destroy() {
        let now = at(2024, 6, 15, 10, 30);
        let candidates = vec![
            managed(at(2024, 6, 15, 1, 0)),
            managed(at(2024, 6, 15, 2, 0)),
            managed(at(2024, 6, 14, 1, 0)),
            managed(at(2024, 6, 14, 2, 0)),
        ];
        let plan = plan(&schema("2k"), &candidates, now, false);
        assert_eq!(plan.keep.len(), 4);
        assert!(plan.destroy.is_empty());
    }

    #[test]
    fn snapshots_newer_than_the_bucket_span_are_kept() {
        let now = at(2024, 6, 15, 10, 30);
        let future = managed(at(2024, 6, 16, 9, 0));
        let plan = plan(&schema("1d"), &[future.clone()], now, true);
        assert_eq!(plan.keep, vec![future]);
    }

    #[test]
    fn boundary_instant_belongs_to_the_older_bucket() {
        let now = at(2024, 6, 15, 10, 30);
        // Midnight June 15 closes the "June 14" bucket under a 2d schema.
        let edge = managed(at(2024, 6, 15, 0, 0));
        let later = managed(at(2024, 6, 15, 6, 0));
        let plan = plan(&schema("2d"), &[edge.clone(), later.clone()], now, true);
        // If the edge snapshot shared the June 15 bucket, one of the two
        // would be destroyed.
        assert_eq!(plan.keep.len(), 2, "{plan:?}");
    }

    #[test]
    fn oldest_floor_is_exclusive() {
        let now = at(2024, 6, 15, 10, 30);
        // 2k24h7d spans ten days back from the midnight closing June 15,
        // so the oldest floor sits at June 6 00:00. A snapshot exactly on
        // that floor has aged out.
        let edge = managed(at(2024, 6, 6, 0, 0));
        let plan = plan(&schema("2k24h7d"), &[edge.clone()], now, true);
        assert_eq!(plan.destroy, vec![edge]);
    }

    #[test]
    fn planner_is_idempotent() {
        let now = at(2024, 6, 15, 10, 30);
        let candidates: Vec<_> = (0..60)
            .map(|i| managed(now - chrono::Duration::hours(i * 5)))
            .collect();
        let s = schema("1k12h7d4w");
        let first = plan(&s, &candidates, now, true);
        let second = plan(&s, &first.keep, now, true);
        assert_eq!(second.keep, first.keep);
        assert!(second.destroy.is_empty());
    }

    #[test]
    fn destroys_are_ordered_oldest_first() {
        let now = at(2024, 6, 15, 10, 30);
        let candidates = vec![
            managed(at(2024, 1, 3, 0, 0)),
            managed(at(2024, 1, 1, 0, 0)),
            managed(at(2024, 1, 2, 0, 0)),
        ];
        let plan = plan(&schema("1d"), &candidates, now, true);
        assert_eq!(
            names(&plan.destroy),
            vec!["202401010000", "202401020000", "202401030000"]
        );
    }

    #[test]
    fn daily_schema_rolls_the_oldest_day_out() {
        // Daily 21:00 snapshots under 3d: after the fourth run the first
        // day has aged out.
        let now = at(2024, 1, 4, 21, 0);
        let candidates = vec![
            managed(at(2024, 1, 1, 21, 0)),
            managed(at(2024, 1, 2, 21, 0)),
            managed(at(2024, 1, 3, 21, 0)),
            managed(at(2024, 1, 4, 21, 0)),
        ];
        let plan = plan(&schema("3d0w0m0y"), &candidates, now, false);
        assert_eq!(names(&plan.destroy), vec!["202401012100"]);
        assert_eq!(
            names(&plan.keep),
            vec!["202401022100", "202401032100", "202401042100"]
        );
    }

    #[test]
    fn mixed_schema_spans() {
        // now = 2024-06-15 10:30, schema 2k24h7d.
        let now = at(2024, 6, 15, 10, 30);
        let in_keep_span = managed(at(2024, 6, 15, 0, 30));
        let in_hour_span = managed(at(2024, 6, 13, 5, 0));
        let aged_out = managed(at(2024, 6, 5, 0, 0));
        let candidates = vec![in_keep_span.clone(), in_hour_span.clone(), aged_out.clone()];
        let plan = plan(&schema("2k24h7d"), &candidates, now, false);
        assert!(plan.keep.contains(&in_keep_span));
        assert!(plan.keep.contains(&in_hour_span));
        assert_eq!(plan.destroy, vec![aged_out]);
    }
}
