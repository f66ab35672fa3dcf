//! Log file to sinks, with real worker threads and tasks.

use crate::helpers::{append, eventually, recording_speech};
use async_trait::async_trait;
use chatvoice::forward::rate_limit::RateLimiter;
use chatvoice::forward::{ForwardQueue, ForwardSink, ForwardTarget, run_forward_consumer};
use chatvoice::{Pipeline, Router, Sinks, SourceSet, SourceUpdate, WatchedSourceConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CollectingSink {
    sent: Mutex<Vec<(String, String)>>,
}

impl CollectingSink {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForwardSink for CollectingSink {
    fn id(&self) -> &'static str {
        "collect"
    }

    async fn send(&self, target: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_owned(), text.to_owned()));
        Ok(())
    }
}

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn chat_lines_reach_enabled_sinks_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let spoken_log = dir.path().join("spoken.log");
    let forwarded_log = dir.path().join("forwarded.log");
    append(&spoken_log, "[CHAT] <Old> from before start\n");
    append(&forwarded_log, "");

    let (speech, recorder) = recording_speech(false);
    let queue = ForwardQueue::new();
    let target = ForwardTarget::new(Some("general".to_owned()));
    let sink = Arc::new(CollectingSink::default());
    let cancel = CancellationToken::new();

    tokio::spawn(run_forward_consumer(
        queue.clone(),
        target.clone(),
        Arc::clone(&sink) as Arc<dyn ForwardSink>,
        RateLimiter::new(0),
        cancel.child_token(),
    ));

    let mut forward_only = WatchedSourceConfig::new(forwarded_log.to_string_lossy());
    forward_only.speech_enabled = false;
    forward_only.forward_enabled = true;
    let sources = SourceSet::from_configs([
        WatchedSourceConfig::new(spoken_log.to_string_lossy()),
        forward_only,
    ])
    .unwrap();
    let sinks = Sinks::new(speech.handle(), queue, target);
    let pipeline = Pipeline::new(sources, Router::new(sinks), 64);
    let pipeline_task = tokio::spawn(pipeline.run(Duration::from_millis(10), cancel.clone()));

    // Let both tailers open at end-of-file.
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&spoken_log, "[12:00:01] [Render thread/INFO]: [CHAT] §a<Steve> §rhello\n");
    append(&spoken_log, "[12:00:02] [Render thread/INFO]: not chat\n");
    append(&spoken_log, "[12:00:03] [Render thread/INFO]: [CHAT] Server restarting\n");
    append(&forwarded_log, "[CHAT] <Alex> §lgg\n");

    assert!(eventually(WAIT, || recorder.spoken().len() == 2).await);
    assert!(eventually(WAIT, || sink.sent().len() == 1).await);
    assert_eq!(
        recorder.spoken(),
        vec!["Steve says hello", "Server restarting"]
    );
    assert_eq!(
        sink.sent(),
        vec![("general".to_owned(), "<Alex> gg".to_owned())]
    );

    cancel.cancel();
    pipeline_task.await.unwrap();
    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn toggling_speech_leaves_forwarding_running() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("latest.log");
    append(&log, "");
    let path = log.to_string_lossy().into_owned();

    let (speech, recorder) = recording_speech(false);
    let queue = ForwardQueue::new();
    let target = ForwardTarget::new(Some("chan".to_owned()));
    let sink = Arc::new(CollectingSink::default());
    let cancel = CancellationToken::new();
    tokio::spawn(run_forward_consumer(
        queue.clone(),
        target.clone(),
        Arc::clone(&sink) as Arc<dyn ForwardSink>,
        RateLimiter::new(0),
        cancel.child_token(),
    ));

    let mut config = WatchedSourceConfig::new(path.clone());
    config.forward_enabled = true;
    let sources = SourceSet::from_configs([config.clone()]).unwrap();
    let sinks = Sinks::new(speech.handle(), queue, target);
    let mut pipeline = Pipeline::new(sources, Router::new(sinks), 64);
    let updates = pipeline.update_sender();
    let pipeline_task = tokio::spawn(pipeline.run(Duration::from_millis(10), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    append(&log, "[CHAT] <A> both\n");
    assert!(eventually(WAIT, || sink.sent().len() == 1 && recorder.spoken().len() == 1).await);

    config.speech_enabled = false;
    updates.send(SourceUpdate::SetFlags(config.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&log, "[CHAT] <A> forward only\n");
    assert!(eventually(WAIT, || sink.sent().len() == 2).await);
    assert_eq!(recorder.spoken(), vec!["A says both"]);

    config.speech_enabled = true;
    config.forward_enabled = false;
    updates.send(SourceUpdate::SetFlags(config)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&log, "[CHAT] <A> speech only\n");
    assert!(eventually(WAIT, || recorder.spoken().len() == 2).await);
    assert_eq!(sink.sent().len(), 2);
    assert_eq!(recorder.spoken()[1], "A says speech only");

    cancel.cancel();
    pipeline_task.await.unwrap();
    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn path_change_follows_new_file_from_its_end() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.log");
    let second = dir.path().join("second.log");
    append(&first, "");
    append(&second, "[CHAT] old news in second\n");

    let (speech, recorder) = recording_speech(false);
    let cancel = CancellationToken::new();
    let sources =
        SourceSet::from_configs([WatchedSourceConfig::new(first.to_string_lossy())]).unwrap();
    let sinks = Sinks::new(
        speech.handle(),
        ForwardQueue::new(),
        ForwardTarget::new(None),
    );
    let mut pipeline = Pipeline::new(sources, Router::new(sinks), 64);
    let updates = pipeline.update_sender();
    let pipeline_task = tokio::spawn(pipeline.run(Duration::from_millis(10), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    updates
        .send(SourceUpdate::SetPath {
            from: first.to_string_lossy().into_owned(),
            to: second.to_string_lossy().into_owned(),
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&first, "[CHAT] ignored\n");
    append(&second, "[CHAT] fresh\n");

    assert!(eventually(WAIT, || !recorder.spoken().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.spoken(), vec!["fresh"]);

    cancel.cancel();
    pipeline_task.await.unwrap();
    tokio::task::spawn_blocking(move || speech.shutdown())
        .await
        .unwrap();
}
