// tests/human_labeling_tests.rs
//
// Integration tests for the human-backed collector and its request/response
// channel, using scripted responder threads in place of a real labeler.
//
// Tests:
// 1. A prompt responder labels to the goal
// 2. A silent labeler leaves comparisons unlabeled after the deadline
// 3. A partially-responsive labeler produces a partial label set
// 4. A disconnected frontend is a stop condition, not a hang
// 5. Responses for already-labeled comparisons are dropped

use std::thread;
use std::time::Duration;

use prefrl::collector::{ComparisonCollector, HumanComparisonCollector, LabelingFrontend};
use prefrl::{ComparisonResponse, Label, Segment, SegmentStep};

fn segment(reward: f64) -> Segment {
    Segment::new(
        vec![
            SegmentStep {
                observation: vec![0.0, 0.0],
                action: vec![0.0],
                reward,
            };
            3
        ],
        "pointmass-v0",
        0,
        0,
    )
}

fn collector_with_comparisons(
    n_segments: usize,
    n_comparisons: usize,
) -> (HumanComparisonCollector, LabelingFrontend, Vec<u64>) {
    let (mut collector, frontend) = HumanComparisonCollector::new(1);
    collector = collector.with_poll_interval(Duration::from_millis(5));
    for i in 0..n_segments {
        collector.add_segment(segment(i as f64));
    }
    let ids: Vec<u64> = (0..n_comparisons)
        .map(|_| collector.invent_comparison().unwrap())
        .collect();
    (collector, frontend, ids)
}

/// Responder that answers every request with Left after a fixed delay.
fn spawn_prompt_responder(frontend: LabelingFrontend, delay: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for request in frontend.requests.iter() {
            thread::sleep(delay);
            if frontend
                .responses
                .send(ComparisonResponse {
                    comparison_id: request.comparison_id,
                    label: Label::Left,
                })
                .is_err()
            {
                return;
            }
        }
    })
}

#[test]
fn test_prompt_responder_reaches_goal() {
    let (mut collector, frontend, ids) = collector_with_comparisons(6, 5);
    let responder = spawn_prompt_responder(frontend, Duration::from_millis(1));

    let newly = collector.label_unlabeled_comparisons(5, false);
    assert_eq!(newly, 5);
    for id in ids {
        assert_eq!(collector.comparison(id).unwrap().label, Label::Left);
    }
    drop(collector);
    responder.join().unwrap();
}

#[test]
fn test_silent_labeler_hits_deadline_and_stays_unlabeled() {
    let (collector, frontend, ids) = collector_with_comparisons(4, 3);
    let mut collector = collector.with_deadline(Duration::from_millis(50));

    // Keep the frontend alive but never answer.
    let newly = collector.label_unlabeled_comparisons(3, true);
    assert_eq!(newly, 0);
    assert_eq!(collector.pending_count(), 3);
    for id in ids {
        assert_eq!(collector.comparison(id).unwrap().label, Label::Unlabeled);
    }
    // Unanswered comparisons are not an error and may still be answered
    // later.
    assert!(collector.can_label_more());
    drop(frontend);
}

#[test]
fn test_partial_labeler_yields_partial_set() {
    let (collector, frontend, ids) = collector_with_comparisons(6, 4);
    let mut collector = collector.with_deadline(Duration::from_millis(200));

    // Answer only the first two requests, then go quiet.
    let responder = thread::spawn(move || {
        for (i, request) in frontend.requests.iter().enumerate() {
            if i >= 2 {
                // Hold the channel open without answering.
                thread::sleep(Duration::from_millis(500));
                continue;
            }
            frontend
                .responses
                .send(ComparisonResponse {
                    comparison_id: request.comparison_id,
                    label: Label::Right,
                })
                .unwrap();
        }
    });

    let newly = collector.label_unlabeled_comparisons(4, false);
    assert_eq!(newly, 2);
    let labeled: Vec<_> = ids
        .iter()
        .filter(|&&id| collector.comparison(id).unwrap().label != Label::Unlabeled)
        .collect();
    assert_eq!(labeled.len(), 2);
    assert_eq!(collector.pending_count(), 2);

    drop(collector);
    responder.join().unwrap();
}

#[test]
fn test_disconnected_frontend_stops_the_wait() {
    let (mut collector, frontend, _ids) = collector_with_comparisons(4, 3);
    drop(frontend);

    let start = std::time::Instant::now();
    let newly = collector.label_unlabeled_comparisons(3, false);
    assert_eq!(newly, 0);
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "disconnect must stop the wait quickly"
    );
    assert!(!collector.can_label_more());
}

#[test]
fn test_duplicate_responses_are_dropped() {
    let (mut collector, frontend, ids) = collector_with_comparisons(4, 2);
    let target = ids[0];

    // Answer the same comparison twice with conflicting labels, then the
    // other one.
    frontend
        .responses
        .send(ComparisonResponse {
            comparison_id: target,
            label: Label::Left,
        })
        .unwrap();
    frontend
        .responses
        .send(ComparisonResponse {
            comparison_id: target,
            label: Label::Right,
        })
        .unwrap();
    frontend
        .responses
        .send(ComparisonResponse {
            comparison_id: ids[1],
            label: Label::Equal,
        })
        .unwrap();

    let newly = collector.label_unlabeled_comparisons(2, false);
    assert_eq!(newly, 2, "duplicate must not count as a new label");
    assert_eq!(collector.comparison(target).unwrap().label, Label::Left);
    assert_eq!(collector.comparison(ids[1]).unwrap().label, Label::Equal);
}
