//! End-to-end behaviour of the coordinator against fake collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use common::{
    fact, wait_until, CapturedLogs, FakeCamera, Harness, RecordingSink, FALLBACK, FEED_URL,
};
use coopcast::{
    BroadcastStart, BroadcastState, BroadcastStop, CoordinatorError, DropReason, MotionOutcome,
    StopReason, TriggerEvent, TriggerKind, TriggerOutcome,
};

fn published_with_media(outcome: &MotionOutcome) -> bool {
    matches!(outcome, MotionOutcome::Published { with_media: true, .. })
}

#[tokio::test(start_paused = true)]
async fn test_motion_is_rate_limited_across_a_window() {
    let h = Harness::builder()
        .min_interval(Duration::from_secs(60))
        .content(vec![fact(0, "Hens have full-color vision.")])
        .build();
    h.coordinator.on_refresh_due().await.unwrap();

    // t=0: publishes with a photo
    let first = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(published_with_media(&first));

    // t=30: still captured, but nothing reaches the sink
    tokio::time::advance(Duration::from_secs(30)).await;
    let second = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert_eq!(second, MotionOutcome::Dropped(DropReason::RateLimited));
    assert_eq!(FakeCamera::count(&h.camera.captures), 2);
    assert_eq!(h.sink.posts().len(), 1);

    // t=61: window has passed
    tokio::time::advance(Duration::from_secs(31)).await;
    let third = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(published_with_media(&third));

    let posts = h.sink.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.media_present));
    assert_eq!(
        posts[0].message,
        "Chicken fact 0: Hens have full-color vision. source: Backyard Almanac"
    );
    assert_eq!(h.leftover_captures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_motion_during_broadcast_posts_text_announcement() {
    let h = Harness::builder().build();

    let start = h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    assert!(matches!(start, BroadcastStart::Started { .. }));
    assert_eq!(h.coordinator.broadcast_state(), BroadcastState::Active);

    tokio::time::advance(Duration::from_secs(5)).await;
    let outcome = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(matches!(outcome, MotionOutcome::Published { with_media: false, .. }));

    let posts = h.sink.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].message, format!("We're live! Watch the coop at {}", FEED_URL));
    assert_eq!(
        posts[1].message,
        format!("Hey! We're running a livestream right now! Come check us out at {}", FEED_URL)
    );
    assert!(posts[1].media.is_none());
    assert_eq!(FakeCamera::count(&h.camera.captures), 0);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_announcements_bypass_rate_limit() {
    let h = Harness::builder().min_interval(Duration::from_secs(60)).build();

    h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    let first = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(matches!(first, MotionOutcome::Published { with_media: false, .. }));

    tokio::time::advance(Duration::from_secs(10)).await;
    let second = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(matches!(second, MotionOutcome::Published { with_media: false, .. }));
    assert_eq!(h.sink.posts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_announcement_ignores_recent_capture_admission() {
    let h = Harness::builder().min_interval(Duration::from_secs(60)).build();

    // t=0: a capture takes the publish window
    let capture = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(published_with_media(&capture));

    // t=1: broadcast starts
    tokio::time::advance(Duration::from_secs(1)).await;
    let start = h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    assert!(matches!(start, BroadcastStart::Started { .. }));

    // t=5: well inside the window, the announcement still goes out
    tokio::time::advance(Duration::from_secs(4)).await;
    let outcome = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(matches!(outcome, MotionOutcome::Published { with_media: false, .. }));

    let posts = h.sink.posts();
    assert_eq!(posts.len(), 3);
    assert!(posts[2].message.starts_with("Hey! We're running a livestream right now!"));
}

#[tokio::test]
async fn test_broadcast_start_during_capture_is_rejected() {
    let camera = FakeCamera::gated();
    let h = Harness::builder().camera(camera.clone()).build();

    let motion = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.on_motion_detected(Instant::now()).await }
    });
    camera.capture_started.notified().await;

    let start = h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    assert_eq!(start, BroadcastStart::ResourceBusy);
    assert_eq!(h.coordinator.broadcast_state(), BroadcastState::Idle);
    assert_eq!(FakeCamera::count(&camera.stream_starts), 0);

    camera.open_gate();
    let outcome = motion.await.unwrap().unwrap();
    assert!(published_with_media(&outcome));
    assert_eq!(h.coordinator.status().await.resource_holder, None);
}

#[tokio::test]
async fn test_broadcast_start_during_capture_upload_is_rejected() {
    let sink = RecordingSink::gated();
    let h = Harness::builder().sink(sink.clone()).build();

    let motion = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.on_motion_detected(Instant::now()).await }
    });
    sink.media_started.notified().await;

    // Capture is done but the post is still in flight; the camera stays held.
    assert!(h.coordinator.status().await.resource_holder.is_some());
    let start = h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    assert_eq!(start, BroadcastStart::ResourceBusy);
    assert_eq!(FakeCamera::count(&h.camera.stream_starts), 0);

    sink.open_gate();
    assert!(published_with_media(&motion.await.unwrap().unwrap()));
    assert_eq!(h.coordinator.status().await.resource_holder, None);
    assert_eq!(h.leftover_captures(), 0);
}

#[tokio::test]
async fn test_second_motion_during_capture_is_dropped_busy() {
    let camera = FakeCamera::gated();
    let h = Harness::builder().camera(camera.clone()).build();

    let first = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.on_motion_detected(Instant::now()).await }
    });
    camera.capture_started.notified().await;

    // Waits out the short capture timeout, then gives up.
    let second = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert_eq!(second, MotionOutcome::Dropped(DropReason::ResourceBusy));

    camera.open_gate();
    assert!(published_with_media(&first.await.unwrap().unwrap()));
    assert_eq!(h.sink.posts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_stops_itself_at_max_duration() {
    let h = Harness::builder().max_broadcast(Duration::from_secs(600)).build();
    h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(601)).await;
    let coordinator = h.coordinator.clone();
    wait_until(move || coordinator.broadcast_state() == BroadcastState::Idle).await;

    let camera = h.camera.clone();
    wait_until(move || FakeCamera::count(&camera.stream_stops) == 1).await;
    assert_eq!(h.coordinator.status().await.resource_holder, None);

    // Camera is usable again.
    let outcome = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(published_with_media(&outcome));
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_ends_session() {
    let h = Harness::builder().build();
    h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();

    assert!(h.camera.fail_stream("ffmpeg exited with 1"));
    let coordinator = h.coordinator.clone();
    wait_until(move || coordinator.broadcast_state() == BroadcastState::Idle).await;

    let stop = h.coordinator.on_broadcast_stop().await.unwrap();
    assert_eq!(stop, BroadcastStop::NotActive);
    let camera = h.camera.clone();
    wait_until(move || camera.stream_stops.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_releases_and_allows_restart() {
    let h = Harness::builder().build();

    let first = h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    let BroadcastStart::Started { generation, .. } = &first else {
        panic!("expected start, got {first:?}");
    };
    let generation = *generation;
    assert_eq!(
        h.coordinator.on_broadcast_start(Instant::now()).await.unwrap(),
        BroadcastStart::AlreadyActive
    );

    tokio::time::advance(Duration::from_secs(42)).await;
    match h.coordinator.on_broadcast_stop().await.unwrap() {
        BroadcastStop::Stopped {
            generation: stopped,
            reason,
            ran_for,
        } => {
            assert_eq!(stopped, generation);
            assert_eq!(reason, StopReason::Requested);
            assert_eq!(ran_for.as_secs(), 42);
        }
        other => panic!("unexpected stop outcome {other:?}"),
    }
    assert_eq!(h.coordinator.on_broadcast_stop().await.unwrap(), BroadcastStop::NotActive);

    let again = h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();
    assert!(matches!(again, BroadcastStart::Started { generation: g, .. } if g != generation));
}

#[tokio::test]
async fn test_motion_while_stopping_still_sees_broadcast() {
    let camera = FakeCamera::with_stop_gate();
    let h = Harness::builder().camera(camera.clone()).build();
    h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();

    let stop = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.on_broadcast_stop().await }
    });
    camera.stop_started.notified().await;

    // Stream is winding down and the lease is not back yet.
    assert_eq!(h.coordinator.broadcast_state(), BroadcastState::Active);
    let outcome = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(matches!(outcome, MotionOutcome::Published { with_media: false, .. }));
    assert_eq!(FakeCamera::count(&camera.captures), 0);

    camera.open_stop_gate();
    let stopped = stop.await.unwrap().unwrap();
    assert!(matches!(stopped, BroadcastStop::Stopped { reason: StopReason::Requested, .. }));
    assert_eq!(h.coordinator.broadcast_state(), BroadcastState::Idle);
    assert_eq!(h.coordinator.status().await.resource_holder, None);
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_does_not_log_stream_failure() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let h = Harness::builder().build();
    h.camera.fail_on_stop.store(true, Ordering::SeqCst);
    h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();

    // Stopping kills the encoder, which reports a failed exit right away.
    let stopped = h.coordinator.on_broadcast_stop().await.unwrap();
    assert!(matches!(stopped, BroadcastStop::Stopped { reason: StopReason::Requested, .. }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let output = logs.contents();
    assert!(output.contains("Broadcast stopped"));
    assert!(!output.contains("Broadcast stream failed"), "{output}");
    assert_eq!(FakeCamera::count(&h.camera.stream_stops), 1);
}

#[tokio::test]
async fn test_capture_failure_releases_and_refunds_nothing() {
    let h = Harness::builder().build();
    h.camera.fail_capture.store(true, Ordering::SeqCst);

    let err = h.coordinator.on_motion_detected(Instant::now()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Hardware(_)));
    assert_eq!(FakeCamera::count(&h.camera.opens), 1);
    assert_eq!(FakeCamera::count(&h.camera.closes), 1);
    assert_eq!(h.coordinator.status().await.resource_holder, None);

    // The failed attempt never reached the limiter.
    h.camera.fail_capture.store(false, Ordering::SeqCst);
    let outcome = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert!(published_with_media(&outcome));
    assert_eq!(h.leftover_captures(), 0);
}

#[tokio::test]
async fn test_publish_failure_keeps_admission() {
    let h = Harness::builder().build();
    h.sink.fail.store(true, Ordering::SeqCst);

    let err = h.coordinator.on_motion_detected(Instant::now()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Publish(_)));
    assert_eq!(h.leftover_captures(), 0);

    h.sink.fail.store(false, Ordering::SeqCst);
    let outcome = h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert_eq!(outcome, MotionOutcome::Dropped(DropReason::RateLimited));
}

#[tokio::test]
async fn test_caption_falls_back_without_content() {
    let h = Harness::builder().content(Vec::new()).build();
    h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert_eq!(h.sink.posts()[0].message, FALLBACK);

    let h = Harness::builder().build();
    h.coordinator.on_motion_detected(Instant::now()).await.unwrap();
    assert_eq!(h.sink.posts()[0].message, FALLBACK);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_routes_triggers() {
    let h = Harness::builder()
        .content(vec![fact(0, "a"), fact(1, "b")])
        .build();

    let refreshed = h
        .coordinator
        .dispatch(TriggerEvent::now(TriggerKind::RefreshDue))
        .await
        .unwrap();
    assert_eq!(refreshed, TriggerOutcome::Refreshed(2));

    let started = h
        .coordinator
        .dispatch(TriggerEvent::now(TriggerKind::BroadcastStartRequested))
        .await
        .unwrap();
    assert!(matches!(started, TriggerOutcome::BroadcastStart(BroadcastStart::Started { .. })));

    let motion = h
        .coordinator
        .dispatch(TriggerEvent::now(TriggerKind::MotionDetected))
        .await
        .unwrap();
    assert!(matches!(motion, TriggerOutcome::Motion(MotionOutcome::Published { with_media: false, .. })));

    let stopped = h
        .coordinator
        .dispatch(TriggerEvent::now(TriggerKind::BroadcastStopRequested))
        .await
        .unwrap();
    assert!(matches!(stopped, TriggerOutcome::BroadcastStop(BroadcastStop::Stopped { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_broadcast() {
    let h = Harness::builder().build();
    h.coordinator.on_broadcast_start(Instant::now()).await.unwrap();

    assert_eq!(h.coordinator.shutdown().await, None);
    assert_eq!(h.coordinator.broadcast_state(), BroadcastState::Idle);
    assert_eq!(FakeCamera::count(&h.camera.stream_stops), 1);
}

#[tokio::test]
async fn test_shutdown_forces_lease_and_late_release_is_reported() {
    let camera = FakeCamera::gated();
    let h = Harness::builder().camera(camera.clone()).build();

    let motion = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.on_motion_detected(Instant::now()).await }
    });
    camera.capture_started.notified().await;

    let forced = h.coordinator.shutdown().await;
    assert!(forced.is_some());

    camera.open_gate();
    let err = motion.await.unwrap().unwrap_err();
    assert!(matches!(err, CoordinatorError::Release(_)));
    assert_eq!(h.leftover_captures(), 0);
}

#[tokio::test]
async fn test_status_reports_content_and_publish_age() {
    let h = Harness::builder().content(vec![fact(0, "a")]).build();
    let status = h.coordinator.status().await;
    assert_eq!(status.content_items, 0);
    assert_eq!(status.secs_since_last_publish, None);

    h.coordinator.on_refresh_due().await.unwrap();
    h.coordinator.on_motion_detected(Instant::now()).await.unwrap();

    let status = h.coordinator.status().await;
    assert_eq!(status.broadcast, BroadcastState::Idle);
    assert_eq!(status.content_items, 1);
    assert_eq!(status.refresh_failures, 0);
    assert!(status.secs_since_last_publish.is_some());
}
