use crate::helpers::{eventually, recording_speech};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn clear_drops_backlog_but_keeps_later_jobs() {
    let (speech, recorder) = recording_speech(true);
    let handle = speech.handle();

    handle.speak("busy").unwrap();
    assert!(eventually(WAIT, || recorder.spoken() == ["busy"]).await);

    for i in 0..20 {
        handle.speak(format!("stale {i}")).unwrap();
    }
    handle.clear().unwrap();
    handle.speak("after").unwrap();

    assert!(eventually(WAIT, || recorder.spoken().len() == 2).await);
    assert_eq!(recorder.spoken(), vec!["busy", "after"]);
    assert_eq!(recorder.stops(), 1);

    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn queued_jobs_wait_for_current_utterance() {
    let (speech, recorder) = recording_speech(true);
    let handle = speech.handle();

    handle.speak("first").unwrap();
    handle.speak("second").unwrap();
    assert!(eventually(WAIT, || !recorder.spoken().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(recorder.spoken(), vec!["first"]);

    recorder.finish();
    assert!(eventually(WAIT, || recorder.spoken().len() == 2).await);
    assert_eq!(recorder.spoken(), vec!["first", "second"]);
    assert_eq!(recorder.stops(), 0);

    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn clear_while_idle_is_harmless() {
    let (speech, recorder) = recording_speech(false);
    let handle = speech.handle();

    handle.clear().unwrap();
    handle.clear().unwrap();
    handle.speak("still works").unwrap();

    assert!(eventually(WAIT, || recorder.spoken() == ["still works"]).await);
    assert_eq!(recorder.stops(), 0);

    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .unwrap();
}
