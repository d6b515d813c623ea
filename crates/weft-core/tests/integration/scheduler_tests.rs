use std::sync::Arc;
use std::time::Duration;

use weft_core::{
    CrawlError, DataArgs, ErrorKind, IgnoreReason, ModuleArgs, RequestArgs, Scheduler, Status,
};

use crate::integration::common::{
    CollectingPipeline, GateRecorder, LinkAnalyzer, SiteDownloader, url, wait_idle,
};

const ROOT: &str = "https://example.com/";

fn scheduler() -> (Scheduler, GateRecorder) {
    let recorder = GateRecorder::default();
    let sched = Scheduler::with_reporter(Arc::new(recorder.clone()));
    (sched, recorder)
}

fn ignored_with(recorder: &GateRecorder, reason: IgnoreReason) -> Vec<(String, u32)> {
    recorder
        .ignored
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, _, r)| *r == reason)
        .map(|(u, d, _)| (u.clone(), *d))
        .collect()
}

#[tokio::test]
async fn test_crawl_follows_links_within_scope() {
    let downloader = SiteDownloader::new(
        1,
        &[
            (ROOT, &["https://example.com/a", "https://other.org/x"]),
            ("https://example.com/a", &[ROOT]),
        ],
    );
    let fetched = downloader.fetched();
    let pipeline = CollectingPipeline::new(1);
    let items = pipeline.items();
    let (sched, recorder) = scheduler();

    sched
        .init(
            RequestArgs::new(["example.com"], 1),
            DataArgs::default(),
            ModuleArgs::new()
                .with_downloader(downloader)
                .with_analyzer(LinkAnalyzer::new(1))
                .with_pipeline(pipeline),
        )
        .unwrap();
    sched.start(url(ROOT)).unwrap();
    wait_idle(&sched).await;

    let mut fetched = fetched.lock().unwrap().clone();
    fetched.sort();
    assert_eq!(
        fetched,
        vec![(ROOT.to_string(), 0), ("https://example.com/a".to_string(), 1)]
    );
    assert_eq!(items.lock().unwrap().len(), 2);
    assert_eq!(
        ignored_with(&recorder, IgnoreReason::OutOfScope),
        vec![("https://other.org/x".to_string(), 1)]
    );
    assert_eq!(
        ignored_with(&recorder, IgnoreReason::AlreadySeen),
        vec![(ROOT.to_string(), 2)]
    );

    let summary = sched.summary();
    assert_eq!(summary.status, Status::Started);
    assert_eq!(summary.url_count, 2);
    assert_eq!(summary.downloaders[0].completed, 2);
    assert_eq!(summary.pipelines[0].accepted, 2);
    assert_eq!(summary.error_buffer_pool.unwrap().total, 0);

    sched.stop().unwrap();
    assert_eq!(sched.status(), Status::Stopped);
}

#[tokio::test]
async fn test_links_beyond_max_depth_are_dropped() {
    let downloader = SiteDownloader::new(
        1,
        &[
            (ROOT, &["https://example.com/d1"]),
            ("https://example.com/d1", &["https://example.com/d2"]),
            ("https://example.com/d2", &["https://example.com/d3"]),
            ("https://example.com/d3", &[]),
        ],
    );
    let fetched = downloader.fetched();
    let (sched, recorder) = scheduler();

    sched
        .init(
            RequestArgs::new(["example.com"], 2),
            DataArgs::default(),
            ModuleArgs::new()
                .with_downloader(downloader)
                .with_analyzer(LinkAnalyzer::new(1))
                .with_pipeline(CollectingPipeline::new(1)),
        )
        .unwrap();
    sched.start(url(ROOT)).unwrap();
    wait_idle(&sched).await;

    let depths: Vec<u32> = {
        let mut d: Vec<u32> = fetched.lock().unwrap().iter().map(|(_, d)| *d).collect();
        d.sort();
        d
    };
    assert_eq!(depths, vec![0, 1, 2]);
    assert_eq!(
        ignored_with(&recorder, IgnoreReason::TooDeep),
        vec![("https://example.com/d3".to_string(), 3)]
    );
    assert_eq!(sched.summary().error_buffer_pool.unwrap().total, 0);
    sched.stop().unwrap();
}

#[tokio::test]
async fn test_each_url_is_downloaded_once() {
    // Every page links to every other page.
    let all: &[&str] = &[
        ROOT,
        "https://example.com/a",
        "https://example.com/b",
        "https://www.example.com/c",
    ];
    let pages: Vec<(&str, &[&str])> = all.iter().map(|p| (*p, all)).collect();
    let downloader = SiteDownloader::new(1, &pages);
    let fetched = downloader.fetched();
    let (sched, _recorder) = scheduler();

    sched
        .init(
            RequestArgs::new(["example.com"], 5),
            DataArgs::default(),
            ModuleArgs::new()
                .with_downloader(downloader)
                .with_analyzer(LinkAnalyzer::new(1))
                .with_analyzer(LinkAnalyzer::new(2))
                .with_pipeline(CollectingPipeline::new(1)),
        )
        .unwrap();
    sched.start(url(ROOT)).unwrap();
    wait_idle(&sched).await;

    let mut urls: Vec<String> = fetched.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
    urls.sort();
    let mut expected: Vec<String> = all.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(urls, expected);
    assert_eq!(sched.summary().url_count, 4);
    sched.stop().unwrap();
}

#[tokio::test]
async fn test_download_errors_reach_error_chan() {
    let downloader = SiteDownloader::new(
        1,
        &[(ROOT, &["https://example.com/broken"])],
    )
    .with_broken("https://example.com/broken");
    let (sched, _recorder) = scheduler();

    sched
        .init(
            RequestArgs::new(["example.com"], 1),
            DataArgs::default(),
            ModuleArgs::new()
                .with_downloader(downloader)
                .with_analyzer(LinkAnalyzer::new(1))
                .with_pipeline(CollectingPipeline::new(1)),
        )
        .unwrap();
    let mut errors = sched.error_chan().unwrap();
    sched.start(url(ROOT)).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .expect("no error arrived")
        .expect("error channel closed");
    assert_eq!(err.kind(), Some(ErrorKind::Downloader));
    assert!(err.to_string().contains("connection reset"));

    wait_idle(&sched).await;
    sched.stop().unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .expect("error channel did not close on stop");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_lifecycle_requires_reinit_after_stop() {
    let build = || {
        ModuleArgs::new()
            .with_downloader(SiteDownloader::new(1, &[(ROOT, &[])]))
            .with_analyzer(LinkAnalyzer::new(1))
            .with_pipeline(CollectingPipeline::new(1))
    };
    let (sched, _recorder) = scheduler();
    let request_args = RequestArgs::new(["example.com"], 1);

    sched
        .init(request_args.clone(), DataArgs::default(), build())
        .unwrap();
    sched
        .init(request_args.clone(), DataArgs::default(), build())
        .unwrap();
    sched.start(url(ROOT)).unwrap();
    assert!(matches!(
        sched.init(request_args.clone(), DataArgs::default(), build()),
        Err(CrawlError::InvalidState(_))
    ));
    assert!(matches!(
        sched.start(url(ROOT)),
        Err(CrawlError::InvalidState(_))
    ));
    wait_idle(&sched).await;
    sched.stop().unwrap();

    assert!(matches!(
        sched.start(url(ROOT)),
        Err(CrawlError::InvalidState(_))
    ));
    assert!(matches!(sched.stop(), Err(CrawlError::InvalidState(_))));
    assert_eq!(sched.status(), Status::Stopped);

    sched
        .init(request_args, DataArgs::default(), build())
        .unwrap();
    assert_eq!(sched.summary().url_count, 0);
    sched.start(url(ROOT)).unwrap();
    wait_idle(&sched).await;
    assert_eq!(sched.summary().url_count, 1);
    sched.stop().unwrap();
}

#[tokio::test]
async fn test_env_overrides_shape_the_pools() {
    let data_args = DataArgs::from_lookup(|key| match key {
        "WEFT_REQ_BUFFER_CAP" => Some("7".into()),
        "WEFT_ERROR_MAX_BUFFERS" => Some("3".into()),
        _ => None,
    })
    .unwrap();
    let (sched, _recorder) = scheduler();
    sched
        .init(
            RequestArgs::new(["example.com"], 0),
            data_args,
            ModuleArgs::new()
                .with_downloader(SiteDownloader::new(1, &[]))
                .with_analyzer(LinkAnalyzer::new(1))
                .with_pipeline(CollectingPipeline::new(1)),
        )
        .unwrap();

    let summary = sched.summary();
    assert_eq!(summary.req_buffer_pool.unwrap().buffer_cap, 7);
    assert_eq!(summary.error_buffer_pool.unwrap().max_buffers, 3);
    assert_eq!(summary.item_buffer_pool.unwrap().buffer_cap, 50);
}
