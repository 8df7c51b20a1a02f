mod common;

use std::time::Duration;

use common::{assert_consecutive, question, sequence, sleep_secs, Harness};
use verifycam_core::capture::capture_session::CaptureStatus;
use verifycam_core::capture::domain::capture_attempt::StopCause;
use verifycam_core::capture::domain::capture_error::CaptureError;
use verifycam_core::capture::domain::capture_phase::CapturePhase;
use verifycam_core::verification::domain::loan_product::LoanProduct;
use verifycam_core::verification::domain::verification_session::{
    Advance, FlowError, FlowStage,
};
use verifycam_core::verification::verification_flow::{ExitAction, VerificationFlow};

/// Records one answer of `seconds` and stops it by hand.
async fn answer(flow: &VerificationFlow, seconds: f64) {
    let capture = flow.capture().expect("capture session");
    capture.mark_prompt_watched();
    capture.wait_until(CaptureStatus::can_record).await.unwrap();
    capture.start().await.unwrap();
    sleep_secs(seconds).await;
    capture.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_personal_loan_end_to_end() {
    let h = Harness::new();
    let mut flow = VerificationFlow::new(h.env.clone(), LoanProduct::for_key("personal")).unwrap();
    let mut stages = flow.subscribe();

    let intro = flow.intro();
    assert_eq!(intro.title, "Personal Loan");
    assert_eq!(intro.clip.as_deref(), Some("/videos/personal-loan-intro.mp4"));
    assert_eq!(flow.stage(), FlowStage::Intro);

    flow.finish_intro().unwrap();
    assert_eq!(*stages.borrow_and_update(), FlowStage::Verification);

    answer(&flow, 10.5).await;
    assert_eq!(flow.submit_response().await.unwrap(), Advance::NextQuestion(1));
    assert_eq!(flow.current_question().unwrap().index, 1);

    answer(&flow, 45.5).await;
    assert_eq!(flow.submit_response().await.unwrap(), Advance::NextQuestion(2));

    // The third answer runs into the 60 second limit.
    let capture = flow.capture().unwrap();
    capture.mark_prompt_watched();
    capture.wait_until(CaptureStatus::can_record).await.unwrap();
    capture.start().await.unwrap();
    let stopped = capture
        .wait_until(|s| s.phase == CapturePhase::Stopped)
        .await
        .unwrap();
    assert_eq!(stopped.last_stop, Some(StopCause::Timeout));

    assert_eq!(flow.submit_response().await.unwrap(), Advance::Processing);
    assert_eq!(flow.stage(), FlowStage::Processing);
    assert!(flow.capture().is_none());
    assert_eq!(flow.processing_remaining(), Some(Duration::from_secs(3)));

    flow.finish_processing().await.unwrap();
    assert_eq!(flow.stage(), FlowStage::Complete);
    assert_eq!(*stages.borrow_and_update(), FlowStage::Complete);

    let attempts = flow.attempts();
    let causes: Vec<_> = attempts.iter().map(|a| a.stop_cause).collect();
    assert_eq!(
        causes,
        vec![
            Some(StopCause::Manual),
            Some(StopCause::Manual),
            Some(StopCause::Timeout)
        ]
    );
    let elapsed: Vec<_> = attempts.iter().map(|a| a.elapsed_seconds).collect();
    assert_eq!(elapsed, vec![10, 45, 60]);

    let clips = flow.accepted_clips().unwrap();
    assert_eq!(clips.len(), 3);
    for clip in &clips {
        assert_consecutive(&sequence(clip));
    }

    let streams = h.devices.streams();
    assert_eq!(streams.len(), 3);
    for stream in &streams {
        assert_eq!(stream.release_count(), 1);
        assert_eq!(stream.active_recorder_count(), 0);
    }
    assert!(!h.camera.is_held());

    let exit = flow.exit(ExitAction::ContinueApplication).unwrap();
    assert_eq!(exit.product_key, "personal");
    assert_eq!(
        exit.next_step.as_deref(),
        Some("/loan-application/personal/details")
    );
    assert_eq!(exit.clips, clips);
}

#[tokio::test(start_paused = true)]
async fn test_submit_while_recording_keeps_the_question() {
    let h = Harness::new();
    let mut flow = VerificationFlow::new(h.env.clone(), LoanProduct::for_key("home")).unwrap();
    flow.finish_intro().unwrap();

    let capture = flow.capture().unwrap();
    capture.mark_prompt_watched();
    capture.wait_until(CaptureStatus::can_record).await.unwrap();
    capture.start().await.unwrap();

    let err = flow.submit_response().await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Capture(CaptureError::InvalidTransition(_))
    ));
    assert_eq!(flow.stage(), FlowStage::Verification);
    assert_eq!(flow.current_question().unwrap().index, 0);
    assert_eq!(
        flow.capture().unwrap().status().phase,
        CapturePhase::Recording
    );

    flow.cancel().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_the_live_stream() {
    let h = Harness::new();
    let mut flow = VerificationFlow::new(h.env.clone(), LoanProduct::for_key("vehicle")).unwrap();
    flow.finish_intro().unwrap();
    answer(&flow, 2.5).await;

    flow.cancel().await;

    let stream = h.devices.stream(0);
    assert_eq!(stream.release_count(), 1);
    assert_eq!(stream.active_recorder_count(), 0);
    assert!(!h.camera.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_stage_operations_out_of_order_are_rejected() {
    let h = Harness::new();
    let mut flow = VerificationFlow::new(h.env.clone(), LoanProduct::for_key("business")).unwrap();

    assert_eq!(
        flow.submit_response().await.unwrap_err(),
        FlowError::NoActiveCapture
    );
    assert!(matches!(
        flow.finish_processing().await,
        Err(FlowError::WrongStage { .. })
    ));
    assert_eq!(flow.processing_remaining(), None);
    assert!(matches!(
        flow.accepted_clips(),
        Err(FlowError::WrongStage { .. })
    ));

    flow.finish_intro().unwrap();
    assert!(matches!(
        flow.finish_intro(),
        Err(FlowError::WrongStage { .. })
    ));

    flow.cancel().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_product_falls_back_to_personal() {
    let h = Harness::new();
    let flow = VerificationFlow::new(h.env.clone(), LoanProduct::for_key("yacht")).unwrap();
    assert_eq!(flow.product().key, "personal");
    assert_eq!(flow.product().questions.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_product_without_questions_is_rejected() {
    let h = Harness::new();
    let product = LoanProduct::custom("empty", "Empty", "Nothing to ask.", None, Vec::new());
    assert_eq!(
        VerificationFlow::new(h.env.clone(), product).err(),
        Some(FlowError::NoQuestions("empty".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_question_duration_override_and_dashboard_exit() {
    let h = Harness::new();
    let product = LoanProduct::custom(
        "quick",
        "Quick Check",
        "One short answer.",
        None,
        vec![question(0).with_max_duration(3)],
    );
    let mut flow = VerificationFlow::new(h.env.clone(), product).unwrap();
    assert_eq!(flow.intro().clip, None);

    let capture = flow.finish_intro().unwrap();
    assert_eq!(capture.status().max_duration_seconds, 3);
    capture.wait_until(CaptureStatus::can_record).await.unwrap();
    capture.start().await.unwrap();
    capture
        .wait_until(|s| s.phase == CapturePhase::Stopped)
        .await
        .unwrap();

    assert_eq!(flow.submit_response().await.unwrap(), Advance::Processing);
    flow.finish_processing().await.unwrap();

    let exit = flow.exit(ExitAction::ReturnToDashboard).unwrap();
    assert_eq!(exit.next_step, None);
    assert_eq!(exit.clips.len(), 1);
    assert_consecutive(&sequence(&exit.clips[0]));
}

#[tokio::test(start_paused = true)]
async fn test_questions_must_be_numbered_by_position() {
    let h = Harness::new();
    let product = LoanProduct::custom(
        "one-based",
        "One Based",
        "Numbered from one.",
        None,
        vec![question(1), question(2)],
    );
    assert_eq!(
        VerificationFlow::new(h.env.clone(), product).err(),
        Some(FlowError::Misnumbered {
            position: 0,
            index: 1
        })
    );
    assert_eq!(h.devices.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_duration_override_is_rejected() {
    let h = Harness::new();
    let product = LoanProduct::custom(
        "instant",
        "Instant",
        "No time to answer.",
        None,
        vec![question(0), question(1).with_max_duration(0)],
    );
    assert_eq!(
        VerificationFlow::new(h.env.clone(), product).err(),
        Some(FlowError::ZeroDuration(1))
    );
}

#[tokio::test(start_paused = true)]
async fn test_processing_completes_for_subscribers_without_being_awaited() {
    let h = Harness::new();
    let product = LoanProduct::custom(
        "single",
        "Single",
        "One answer.",
        None,
        vec![question(0)],
    );
    let mut flow = VerificationFlow::new(h.env.clone(), product).unwrap();
    let mut stages = flow.subscribe();
    flow.finish_intro().unwrap();
    answer(&flow, 2.5).await;
    assert_eq!(flow.submit_response().await.unwrap(), Advance::Processing);
    assert_eq!(*stages.borrow_and_update(), FlowStage::Processing);

    stages
        .wait_for(|s| *s == FlowStage::Complete)
        .await
        .unwrap();
    assert_eq!(flow.stage(), FlowStage::Complete);
    assert_eq!(flow.accepted_clips().unwrap().len(), 1);
    assert!(matches!(
        flow.finish_processing().await,
        Err(FlowError::WrongStage { .. })
    ));

    let exit = flow.exit(ExitAction::ReturnToDashboard).unwrap();
    assert_eq!(exit.clips.len(), 1);
}
