mod common;

use common::*;
use futures::StreamExt;
use mediafetch::downloader::executor::COOKIE_FILE_NAME;
use mediafetch::downloader::strategies::StrategyCatalog;
use mediafetch::{AuthContext, DownloadRequest, FailureKind, MediaFormat, Quality};

const URL: &str = "https://www.youtube.com/watch?v=abc";

#[tokio::test]
async fn stops_at_first_success_in_catalog_order() {
    let h = harness_with(
        ScriptedRunner::new(vec![
            Step::Fail(EXTRACTION_STDERR.into()),
            Step::Fail(TIMEOUT_STDERR.into()),
            Step::Succeed,
        ]),
        StrategyCatalog::default(),
        |_| {},
    );

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;
    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(outcome.attempts.len(), 3);

    let downloads = h.runner.downloads();
    assert_eq!(downloads.len(), 3);

    let catalog = StrategyCatalog::default();
    let expected: Vec<&str> = catalog
        .list_strategies()
        .iter()
        .take(3)
        .map(|s| s.name.as_str())
        .collect();
    let tried: Vec<&str> = outcome.attempts.iter().map(|a| a.strategy.as_str()).collect();
    assert_eq!(tried, expected);

    // Each attempt presented a different identity
    let agents: Vec<&str> = downloads
        .iter()
        .map(|d| d.arg_value("--user-agent").unwrap())
        .collect();
    assert_ne!(agents[0], agents[1]);
    assert_ne!(agents[1], agents[2]);
}

#[tokio::test]
async fn audio_download_end_to_end() {
    let h = harness_with(
        ScriptedRunner::with_info(
            vec![
                Step::Fail(BOT_STDERR.into()),
                Step::Fail(TIMEOUT_STDERR.into()),
                Step::Succeed,
            ],
            Some(info_json("My Song")),
        ),
        three_strategies(),
        |_| {},
    );

    let request = DownloadRequest::new("https://example.com/watch?id=abc")
        .with_format(MediaFormat::AudioOnly)
        .with_quality(Quality::Best);
    let outcome = h.engine.start_download(request).await;

    assert!(outcome.success, "{:?}", outcome.message);
    let kinds: Vec<_> = outcome.attempts.iter().map(|a| a.failure).collect();
    assert_eq!(
        kinds,
        vec![
            Some(FailureKind::BotDetectionSuspected),
            Some(FailureKind::NetworkOrTimeout),
            None
        ]
    );
    assert_eq!(outcome.metadata.as_ref().unwrap().title, "My Song");

    let artifact = outcome.artifact.clone().unwrap();
    let name = artifact.file_name();
    assert!(name.starts_with("My Song_"), "{}", name);
    assert!(name.ends_with(".mp3"), "{}", name);
    assert_eq!(artifact.path.parent().unwrap(), h.scratch());
    assert_eq!(h.engine.temp_status().await.file_count, 1);

    let (mut delivery, receipt) = h.engine.deliver(&artifact).await.unwrap();
    assert_eq!(delivery.content_type(), "audio/mpeg");
    assert_eq!(delivery.content_length(), b"media bytes".len() as u64);

    let mut body = Vec::new();
    while let Some(chunk) = delivery.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, b"media bytes");
    drop(delivery);

    assert!(receipt.wait().await);
    assert!(!artifact.path.exists());
    assert_eq!(h.engine.temp_status().await.file_count, 0);
}

#[tokio::test]
async fn exhaustion_reports_most_informative_failure() {
    let h = harness(vec![
        Step::Fail(TIMEOUT_STDERR.into()),
        Step::Fail(BOT_STDERR.into()),
        Step::Fail(EXTRACTION_STDERR.into()),
    ]);

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.failure, Some(FailureKind::BotDetectionSuspected));
    assert!(outcome.message.as_deref().unwrap().contains("second"));
    assert!(outcome.suggestion.as_deref().unwrap().contains("cookies"));
    assert_eq!(
        outcome.error().unwrap().kind(),
        FailureKind::BotDetectionSuspected
    );

    // Nothing left behind, not even staging debris
    assert!(h.stored_files().is_empty());
    let staging = h.scratch().join(".staging");
    assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
}

#[tokio::test]
async fn unavailable_tier_degrades_within_one_attempt() {
    let h = harness(vec![Step::Fail(FORMAT_STDERR.into()), Step::Succeed]);

    let request = DownloadRequest::new(URL)
        .with_format(MediaFormat::Combined)
        .with_quality(Quality::P1080);
    let outcome = h.engine.start_download(request).await;

    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.actual_quality, Some(Quality::P720));
    assert_eq!(outcome.attempts[0].actual_quality, Some(Quality::P720));

    let downloads = h.runner.downloads();
    assert_eq!(downloads.len(), 2);
    assert!(downloads[0].arg_value("-f").unwrap().contains("[height<=1188]"));
    assert!(downloads[1].arg_value("-f").unwrap().contains("[height<=792]"));
    assert_eq!(
        downloads[0].arg_value("--user-agent"),
        downloads[1].arg_value("--user-agent")
    );
}

#[tokio::test]
async fn lowest_tier_unavailable_moves_to_next_strategy() {
    let h = harness(vec![
        Step::Fail(FORMAT_STDERR.into()),
        Step::Fail(FORMAT_STDERR.into()),
        Step::Succeed,
    ]);

    let request = DownloadRequest::new(URL).with_quality(Quality::P480);
    let outcome = h.engine.start_download(request).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].failure, Some(FailureKind::ExtractionFailed));
    assert_eq!(outcome.actual_quality, Some(Quality::P480));
}

#[tokio::test]
async fn success_without_file_is_a_filesystem_failure() {
    let h = harness(vec![Step::SucceedWithoutFile, Step::Succeed]);

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;
    assert!(outcome.success);
    assert_eq!(
        outcome.attempts[0].failure,
        Some(FailureKind::FilesystemError)
    );
}

#[tokio::test]
async fn renamed_output_is_still_found() {
    let h = harness(vec![Step::SucceedAs("whatever the tool chose.mp4".into())]);

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;
    assert!(outcome.success);

    // Stored under the request's own unique name
    let name = outcome.artifact.unwrap().file_name();
    assert!(name.starts_with("Test Clip_"), "{}", name);
    assert!(name.ends_with(".mp4"), "{}", name);
}

#[tokio::test]
async fn unmerged_container_is_accepted() {
    let h = harness(vec![Step::SucceedAs("Clip [abc].webm".into())]);

    let request = DownloadRequest::new(URL).with_format(MediaFormat::Combined);
    let outcome = h.engine.start_download(request).await;

    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(outcome.attempts.len(), 1);
    let artifact = outcome.artifact.unwrap();
    assert!(artifact.file_name().starts_with("Test Clip_"));
    assert_eq!(artifact.extension(), Some("webm"));

    let (delivery, _receipt) = h.engine.deliver(&artifact).await.unwrap();
    assert_eq!(delivery.content_type(), "video/webm");
}

#[tokio::test]
async fn same_tool_chosen_name_never_shares_an_artifact() {
    let h = harness(vec![
        Step::SucceedAs("Same Title [abc].mp4".into()),
        Step::SucceedAs("Same Title [abc].mp4".into()),
    ]);

    let (a, b) = tokio::join!(
        h.engine.start_download(DownloadRequest::new(URL)),
        h.engine.start_download(DownloadRequest::new(URL)),
    );
    let a = a.artifact.unwrap();
    let b = b.artifact.unwrap();
    assert_ne!(a.path, b.path);
    assert!(a.path.exists() && b.path.exists());
    assert_eq!(h.stored_files().len(), 2);

    // Delivering one leaves the other intact
    let (delivery, receipt) = h.engine.deliver(&a).await.unwrap();
    drop(delivery);
    assert!(receipt.wait().await);
    assert!(!a.path.exists());
    assert!(b.path.exists());
}

#[tokio::test]
async fn media_ids_in_stderr_do_not_skew_classification() {
    let h = harness(vec![
        Step::Fail("ERROR: [youtube] Zk403Qa9xYw: Video unavailable".into()),
        Step::Fail("ERROR: [youtube] aDrMx1b2c3d: Sign in to confirm you're not a bot".into()),
        Step::Fail("ERROR: [youtube] q429Rt8bV1k: Unable to extract uploader id".into()),
    ]);

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;

    let kinds: Vec<_> = outcome.attempts.iter().map(|a| a.failure).collect();
    assert_eq!(
        kinds,
        vec![
            Some(FailureKind::ExtractionFailed),
            Some(FailureKind::BotDetectionSuspected),
            Some(FailureKind::ExtractionFailed),
        ]
    );
    assert_eq!(outcome.failure, Some(FailureKind::BotDetectionSuspected));
    assert!(outcome.message.as_deref().unwrap().contains("second"));
}

#[tokio::test]
async fn percent_in_title_is_not_a_template_field() {
    let h = harness(vec![Step::Succeed]);

    let request = DownloadRequest::new(URL).with_filename(Some("Rate %(id)s 100%".into()));
    let outcome = h.engine.start_download(request).await;
    assert!(outcome.success, "{:?}", outcome.message);

    let template = h.runner.downloads()[0].arg_value("-o").unwrap().to_string();
    assert!(template.starts_with("Rate %%(id)s 100%%_"), "{}", template);
    assert!(template.ends_with(".%(ext)s"), "{}", template);

    let name = outcome.artifact.unwrap().file_name();
    assert!(name.starts_with("Rate %(id)s 100%_"), "{}", name);
    assert!(name.ends_with(".mp4"), "{}", name);
}

#[tokio::test]
async fn timeouts_are_network_failures() {
    let h = harness(vec![Step::TimeOut, Step::TimeOut, Step::TimeOut]);

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;
    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::NetworkOrTimeout));
}

#[tokio::test]
async fn invalid_url_is_rejected_before_any_attempt() {
    let h = harness(vec![Step::Succeed]);

    for url in ["", "not a url", "ftp://example.com/file"] {
        let outcome = h.engine.start_download(DownloadRequest::new(url)).await;
        assert_eq!(outcome.failure, Some(FailureKind::InvalidInput), "{}", url);
        assert!(outcome.attempts.is_empty());
    }
    assert!(h.runner.downloads().is_empty());
}

#[tokio::test]
async fn missing_tool_fails_fast() {
    let h = harness_with(ScriptedRunner::new(vec![Step::Succeed]), three_strategies(), |c| {
        c.tool_path = Some(std::path::PathBuf::from("/nonexistent/bin/yt-dlp"));
    });

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;
    assert_eq!(outcome.failure, Some(FailureKind::ToolUnavailable));
    assert!(outcome.attempts.is_empty());
    assert!(h.runner.calls().is_empty());
    assert!(!h.engine.health().await.is_available);
}

#[tokio::test]
async fn filename_override_beats_metadata_title() {
    let h = harness(vec![Step::Succeed]);

    let request = DownloadRequest::new(URL).with_filename(Some("Custom: Name?".into()));
    let outcome = h.engine.start_download(request).await;
    let name = outcome.artifact.unwrap().file_name();
    assert!(name.starts_with("Custom Name_"), "{}", name);
}

#[tokio::test]
async fn metadata_failure_falls_back_to_untitled() {
    let h = harness_with(
        ScriptedRunner::with_info(vec![Step::Succeed], None),
        three_strategies(),
        |_| {},
    );

    let outcome = h.engine.start_download(DownloadRequest::new(URL)).await;
    assert!(outcome.success);
    assert!(outcome.metadata.unwrap().placeholder);
    assert!(outcome.artifact.unwrap().file_name().starts_with("untitled_"));
}

#[tokio::test]
async fn cookie_blob_reaches_every_attempt() {
    let h = harness(vec![Step::Fail(BOT_STDERR.into()), Step::Succeed]);

    let request = DownloadRequest::new(URL)
        .with_auth(Some(AuthContext::CookieBlob("# Netscape HTTP Cookie File".into())))
        .with_user_agent(Some("Caller/1.0".into()));
    let outcome = h.engine.start_download(request).await;
    assert!(outcome.success);

    for inv in h.runner.downloads() {
        let cookies = inv.arg_value("--cookies").unwrap();
        assert!(cookies.ends_with(COOKIE_FILE_NAME));
        assert_eq!(inv.arg_value("--user-agent"), Some("Caller/1.0"));
    }
    // The cookie file lived in staging and went away with it
    assert!(h.stored_files().iter().all(|p| !p.ends_with(COOKIE_FILE_NAME)));
}

#[tokio::test]
async fn concurrent_downloads_of_same_title_do_not_collide() {
    let h = harness(vec![Step::Succeed, Step::Succeed]);

    let (a, b) = tokio::join!(
        h.engine.start_download(DownloadRequest::new(URL)),
        h.engine.start_download(DownloadRequest::new(URL)),
    );
    let a = a.artifact.unwrap();
    let b = b.artifact.unwrap();
    assert_ne!(a.path, b.path);
    assert!(a.path.exists() && b.path.exists());
    assert_eq!(h.stored_files().len(), 2);
}
