use std::cell::{Cell, RefCell};
use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use ods_datasets::app::App;
use ods_datasets::consent::Answer;
use ods_datasets::domain::FetchOptions;
use ods_datasets::error::OdsError;
use ods_datasets::fetch::Fetcher;
use ods_datasets::manifest::Manifest;
use ods_datasets::output::ConsoleOutput;
use ods_datasets::progress::{NoopSink, ProgressEvent, ProgressSink};
use ods_datasets::store::Store;

#[derive(Default)]
struct RecordingFetcher {
    calls: Mutex<Vec<(String, Utf8PathBuf)>>,
    fail_on: Option<String>,
}

impl RecordingFetcher {
    fn failing_on(url: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(url.to_string()),
        }
    }

    fn calls(&self) -> Vec<(String, Utf8PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for RecordingFetcher {
    fn fetch(
        &self,
        url: &str,
        destination: &Utf8Path,
        _sink: &dyn ProgressSink,
    ) -> Result<u64, OdsError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), destination.to_path_buf()));
        if self.fail_on.as_deref() == Some(url) {
            return Err(OdsError::ClientError {
                url: url.to_string(),
                status: 404,
            });
        }
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(destination, url.as_bytes()).unwrap();
        Ok(url.len() as u64)
    }
}

const MANIFEST: &str = r#"{
    "flat": {"urls": ["http://h/"], "files": [["a.txt", "b.txt"]], "license": "CC-BY"},
    "nested": {"urls": ["http://h/"], "files": [["x", "y"]], "dirs": [["d1", "d2"]]},
    "suffixed": {"urls": ["http://h/"], "files": [["s.mat"]], "suffices": [["?dl=1"]]}
}"#;

fn setup(fetcher: RecordingFetcher, override_manual_authorize: bool) -> (TempDir, App<RecordingFetcher>) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let manifest = Manifest::from_json(MANIFEST).unwrap();
    let app = App::new(Store::new(root), manifest, fetcher, override_manual_authorize);
    (temp, app)
}

fn always(answer: Answer) -> impl FnMut(&str, &str) -> Result<Answer, OdsError> {
    move |_: &str, _: &str| Ok(answer.clone())
}

#[test]
fn flat_layout_fetches_each_file_under_dataset_dir() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    let result = app
        .download("flat", &FetchOptions::default(), &mut always(Answer::No), &NoopSink)
        .unwrap();

    let root = app.store().root();
    let calls = app_calls(&app);
    assert_eq!(
        calls,
        vec![
            ("http://h/a.txt".to_string(), root.join("flat/a.txt")),
            ("http://h/b.txt".to_string(), root.join("flat/b.txt")),
        ]
    );
    assert_eq!(result.fetched.len(), 2);
    assert!(app.is_available("flat").unwrap());
}

#[test]
fn nested_layout_keeps_directory() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    app.download("nested", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink)
        .unwrap();

    let root = app.store().root();
    assert_eq!(
        app_calls(&app),
        vec![
            ("http://h/d1/x".to_string(), root.join("nested/d1/x")),
            ("http://h/d2/y".to_string(), root.join("nested/d2/y")),
        ]
    );
}

#[test]
fn suffixed_layout_appends_suffix_to_url_only() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    app.download("suffixed", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink)
        .unwrap();

    let root = app.store().root();
    assert_eq!(
        app_calls(&app),
        vec![("http://h/s.mat?dl=1".to_string(), root.join("suffixed/s.mat"))]
    );
}

#[test]
fn declined_consent_fetches_nothing() {
    let (_temp, app) = setup(RecordingFetcher::default(), false);
    let err = app
        .download("flat", &FetchOptions::default(), &mut always(Answer::No), &NoopSink)
        .unwrap_err();

    assert_matches!(err, OdsError::ConsentDenied(name) if name == "flat");
    assert!(app_calls(&app).is_empty());
    assert!(!app.is_available("flat").unwrap());
}

#[test]
fn consent_is_asked_once_per_download() {
    let (_temp, app) = setup(RecordingFetcher::default(), false);
    let asked = Cell::new(0);
    let mut prompt = |_: &str, _: &str| -> Result<Answer, OdsError> {
        asked.set(asked.get() + 1);
        Ok(Answer::Yes)
    };

    app.download("flat", &FetchOptions::default(), &mut prompt, &NoopSink)
        .unwrap();
    assert_eq!(asked.get(), 1);
    assert_eq!(app_calls(&app).len(), 2);
}

#[test]
fn round_trip_download_available_clear() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    assert!(!app.is_available("nested").unwrap());

    app.download("nested", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink)
        .unwrap();
    assert!(app.is_available("nested").unwrap());

    let cleared = app.clear_cache("nested").unwrap();
    assert_eq!(cleared.removed_files.len(), 2);
    assert_eq!(cleared.removed_dirs.len(), 2);
    assert!(!app.is_available("nested").unwrap());
    assert!(!app.store().root().join("nested/d1").exists());

    let again = app.clear_cache("nested").unwrap();
    assert!(again.removed_files.is_empty());
}

#[test]
fn cached_files_are_skipped_unless_forced() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    let root = app.store().root().to_path_buf();
    fs::create_dir_all(root.join("flat")).unwrap();
    fs::write(root.join("flat/a.txt"), b"cached").unwrap();

    let result = app
        .download("flat", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink)
        .unwrap();
    assert_eq!(result.skipped, vec![root.join("flat/a.txt")]);
    assert_eq!(app_calls(&app).len(), 1);

    let forced = FetchOptions {
        force: true,
        dry_run: false,
    };
    app.download("flat", &forced, &mut always(Answer::Yes), &NoopSink)
        .unwrap();
    assert_eq!(app_calls(&app).len(), 3);
}

#[test]
fn fetch_error_aborts_remaining_files() {
    let (_temp, app) = setup(RecordingFetcher::failing_on("http://h/a.txt"), true);
    let err = app
        .download("flat", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink)
        .unwrap_err();

    assert_matches!(err, OdsError::ClientError { status: 404, ref url } if url == "http://h/a.txt");
    assert_eq!(app_calls(&app).len(), 1);
    assert!(!app.is_available("flat").unwrap());
}

#[test]
fn unknown_dataset_is_a_lookup_failure() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    assert_matches!(app.is_available("nope"), Err(OdsError::UnknownDataset(_)));
    assert_matches!(
        app.download("nope", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink),
        Err(OdsError::UnknownDataset(_))
    );
    assert_matches!(app.clear_cache("nope"), Err(OdsError::UnknownDataset(_)));
}

#[test]
fn ensure_returns_handle_with_details() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    let handle = app
        .ensure("flat", &mut always(Answer::Yes), &NoopSink)
        .unwrap();
    assert_eq!(handle.files.len(), 2);
    assert!(handle.files.iter().all(|path| path.exists()));
    assert_eq!(handle.details.license.as_deref(), Some("CC-BY"));

    app.ensure("flat", &mut always(Answer::Yes), &NoopSink)
        .unwrap();
    assert_eq!(app_calls(&app).len(), 2);
}

#[test]
fn list_reports_availability() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    app.download("nested", &FetchOptions::default(), &mut always(Answer::Yes), &NoopSink)
        .unwrap();

    let listed = app.list();
    assert_eq!(listed.datasets.len(), 3);
    let nested = listed.datasets.iter().find(|e| e.name == "nested").unwrap();
    assert!(nested.available);
    let flat = listed.datasets.iter().find(|e| e.name == "flat").unwrap();
    assert!(!flat.available);
}

#[derive(Default)]
struct NoticeSink {
    lines: RefCell<Vec<String>>,
}

impl ProgressSink for NoticeSink {
    fn event(&self, event: ProgressEvent) {
        if let ProgressEvent::Notice(line) = event {
            self.lines.borrow_mut().push(line);
        }
    }
}

#[test]
fn license_notice_reaches_sink_before_prompt() {
    let (_temp, app) = setup(RecordingFetcher::default(), false);
    let sink = NoticeSink::default();
    let mut prompt = |_: &str, _: &str| -> Result<Answer, OdsError> {
        let lines = sink.lines.borrow();
        assert!(lines.iter().any(|l| l == "You must also agree to the following license:"));
        assert!(lines.iter().any(|l| l == "CC-BY"));
        Ok(Answer::No)
    };

    let err = app
        .download("flat", &FetchOptions::default(), &mut prompt, &sink)
        .unwrap_err();
    assert_matches!(err, OdsError::ConsentDenied(_));
    assert!(sink.lines.borrow().iter().any(|l| l == "Acquiring resource: flat"));
}

#[test]
fn console_sink_renders_license_notice() {
    let (_temp, app) = setup(RecordingFetcher::default(), true);
    let sink = ConsoleOutput::new(Vec::new());
    app.download("flat", &FetchOptions::default(), &mut always(Answer::No), &sink)
        .unwrap();

    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert!(text.contains("You have agreed to the following license:\nCC-BY\n"));
}

fn app_calls(app: &App<RecordingFetcher>) -> Vec<(String, Utf8PathBuf)> {
    app.fetcher().calls()
}
