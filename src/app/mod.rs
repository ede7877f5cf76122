//! TUIのイベントループ、入力処理、状態管理。

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

use crate::{
    config::Config,
    events::{NoticeKind, Notification, Screen, UiState},
    input::InputBoxState,
    shortcuts::Shortcuts,
    slots::SlotRegistry,
    submission::{SubmissionController, SubmissionOutcome},
    ui::Tui,
    view::SlotPanels,
    worker::{self, WorkerCmd, WorkerEvent},
};

use handlers::{handle_key, handle_paste, is_ctrl_c};
use render::draw;

/// 入力処理と描画で共有するアプリ状態。
pub struct App {
    /// 永続化された設定ファイルのパス。
    pub cfg_path: PathBuf,
    /// メモリ上の現在設定。
    pub cfg: Config,
    /// 選択位置やステータスなどUI固有の状態。
    pub ui: UiState,
    /// 画像スロット（宣言順）とその表示パネル。
    pub registry: SlotRegistry<SlotPanels>,
    /// 送信状態と検証。
    pub controller: SubmissionController,
    /// フォームのブランド名（生の入力値）。
    pub brand_name: String,
    /// Workerへのコマンド送信チャネル。
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    /// Workerからのイベント受信チャネル。
    pub worker_rx: mpsc::Receiver<WorkerEvent>,

    /// 設定画面で編集するサーバURL。
    pub base_url: String,
    /// 設定画面で編集する判定エンドポイントのパス。
    pub detect_path: String,
    /// 設定画面で編集する固定CSRFトークン。
    pub csrf_token: String,

    /// 入力ボックスの状態（入力中はSome）。
    pub input_box: Option<InputBoxState>,

    /// ショートカットキー設定。
    pub shortcuts: Shortcuts,
}

impl App {
    /// 設定からスロットを組み立て、先頭スロットにフォーカスした状態で作る。
    pub fn new(
        cfg_path: PathBuf,
        cfg: Config,
        shortcuts: Shortcuts,
        worker_tx: mpsc::Sender<WorkerCmd>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
    ) -> Result<Self> {
        // スロット名の重複は設定ミスなので起動を止める。
        let registry = SlotRegistry::from_config(
            &cfg.form.slots,
            cfg.limits.max_file_bytes,
            SlotPanels::new(),
        )?;
        let controller = SubmissionController::from_config(&cfg);

        let mut app = Self {
            cfg_path,
            ui: UiState::new(Screen::Main),
            registry,
            controller,
            brand_name: String::new(),
            worker_tx,
            worker_rx,
            base_url: cfg.server.base_url.clone(),
            detect_path: cfg.server.detect_path.clone(),
            csrf_token: cfg.server.csrf_token.clone(),
            cfg,
            input_box: None,
            shortcuts,
        };
        focus_slot(&mut app, 0);
        Ok(app)
    }

    /// フォーカス中のスロット名。
    pub fn selected_slot(&self) -> Option<&str> {
        self.registry
            .slots()
            .get(self.ui.selected)
            .map(|s| s.name.as_str())
    }
}

/// ユーザーが終了するまでメインTUIループを回す。
pub async fn run_app(terminal: &mut Tui) -> Result<()> {
    // 設定ファイルを読み込む（初回はデフォルトを生成）。
    let cfg_path = PathBuf::from("config.toml");
    let cfg = Config::load_or_default(&cfg_path)?;

    // ショートカット設定を読み込む（無ければデフォルト）。
    let shortcuts = Shortcuts::load_or_default("shortcut.toml")?;

    // Worker通信用のコマンド/イベントチャネルを作る。
    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::channel::<WorkerEvent>(256);

    // 初期設定スナップショットでWorkerを起動する。
    tokio::spawn(worker::run(rx_cmd, tx_ev, cfg.clone()));

    let mut app = App::new(cfg_path, cfg, shortcuts, tx_cmd, rx_ev)?;
    app.ui
        .push_log(format!("{} image slots ready", app.registry.len()));

    loop {
        // 現在の状態を描画する。
        terminal.draw(|f| draw(f, &app))?;

        // 入力処理の前にWorkerイベントを消化する。
        while let Ok(ev) = app.worker_rx.try_recv() {
            handle_worker_event(&mut app, ev);
        }

        // 表示時間を過ぎた通知を閉じる。
        expire_notification(&mut app, Instant::now());

        // UIの応答性確保のため短いタイムアウトで入力をポーリングする。
        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(k) if k.kind == KeyEventKind::Press => {
                    // どの画面でもCtrl+Cで終了できるようにする。
                    if is_ctrl_c(&k) {
                        break;
                    }
                    if handle_key(&mut app, k).await? {
                        break;
                    }
                }
                // ファイルをターミナルへドロップするとパスが貼り付けられる。
                Event::Paste(text) => handle_paste(&mut app, &text).await?,
                _ => {}
            }
        }
    }
    Ok(())
}

/// WorkerイベントをUI状態へ反映する。
fn handle_worker_event(app: &mut App, ev: WorkerEvent) {
    match ev {
        WorkerEvent::PreviewReady(ready) => {
            // 差し替え済みスロットの古いプレビューは捨てられる。
            let slot = ready.slot.clone();
            if app.registry.apply_preview(ready) {
                app.ui.push_log(format!("preview ready: {slot}"));
            }
        }
        WorkerEvent::SubmissionFinished { ticket, result } => {
            // 現在の送信以外の結果は無視する。
            if let Some(outcome) = app.controller.complete(ticket, result) {
                show_outcome(app, outcome);
            }
        }
        WorkerEvent::Log(s) => {
            app.ui.push_log(s);
        }
        WorkerEvent::Error(s) => {
            // ステータスにエラーを表示する。
            app.ui.push_log(format!("error: {s}"));
            app.ui.status = format!("Error: {s}");
        }
    }
}

/// 判定結果を結果パネルと通知へ反映する。
fn show_outcome(app: &mut App, outcome: SubmissionOutcome) {
    match outcome {
        SubmissionOutcome::Success(report) => {
            let verdict = if report.is_fake { "FAKE" } else { "AUTHENTIC" };
            app.ui.push_log(format!(
                "analysis complete: {verdict} ({:.2}%)",
                report.confidence * 100.0
            ));
            app.ui.status = format!("Result: {verdict}");
            app.ui.result = Some(report);
            notify(app, NoticeKind::Success, "Analysis Complete!");
            if app.cfg.feedback.open_dashboard_on_success {
                open_dashboard(app);
            }
        }
        SubmissionOutcome::Failure { reason } => {
            app.ui.push_log(format!("analysis failed: {reason}"));
            app.ui.status = "Analysis failed".into();
            notify(app, NoticeKind::Error, reason);
        }
    }
}

/// 設定の表示時間で通知を出す。
fn notify(app: &mut App, kind: NoticeKind, message: impl Into<String>) {
    let ttl = app.cfg.notification_ttl();
    app.ui.notification = Some(Notification::new(kind, message, ttl));
}

/// 期限切れの通知を閉じ、送信状態をIdleへ戻す。
fn expire_notification(app: &mut App, now: Instant) {
    if app
        .ui
        .notification
        .as_ref()
        .is_some_and(|n| n.is_expired(now))
    {
        dismiss_notification(app);
    }
}

/// 通知を閉じる（キー操作または期限切れ）。
pub fn dismiss_notification(app: &mut App) {
    app.ui.notification = None;
    app.controller.acknowledge();
}

/// 判定結果一覧をブラウザで開く。失敗してもTUIは続行する。
fn open_dashboard(app: &mut App) {
    let url = app.cfg.dashboard_url();
    match webbrowser::open(&url) {
        Ok(()) => app.ui.push_log(format!("opened {url}")),
        Err(e) => {
            tracing::warn!("failed to open dashboard {url}: {e}");
            app.ui.push_log(format!("could not open {url}"));
        }
    }
}

/// フォーカスを移し、パネルの強調表示を付け替える。
pub fn focus_slot(app: &mut App, idx: usize) {
    if idx >= app.registry.len() {
        return;
    }
    if let Some(prev) = app.selected_slot().map(str::to_owned) {
        app.registry.set_highlighted(&prev, false);
    }
    app.ui.selected = idx;
    if let Some(next) = app.selected_slot().map(str::to_owned) {
        app.registry.set_highlighted(&next, true);
    }
}

/// パスの画像を読み込んでスロットへ入れ、プレビュー生成をWorkerへ依頼する。
pub async fn fill_slot(app: &mut App, idx: usize, raw_path: &str) -> Result<()> {
    let Some(slot) = app.registry.slots().get(idx).map(|s| s.name.clone()) else {
        return Ok(());
    };
    let path = match normalize_dropped_path(raw_path) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("fill {slot} from {raw_path:?} refused: {e}");
            app.ui.push_log(format!("rejected: {e}"));
            app.ui.error = Some(e.to_string());
            return Ok(());
        }
    };
    let replacing = app.registry.get(&slot).is_some_and(|s| s.is_filled());

    // 型とサイズは読み込み前に判定される。失敗はフォームのエラーとして見せる。
    match app.registry.load_file(&slot, &path).await {
        Ok(job) => {
            let file_name = job.file.file_name.clone();
            app.worker_tx.send(WorkerCmd::RenderPreview(job)).await?;
            app.ui.error = None;
            let note = if replacing { " (replaced)" } else { "" };
            app.ui.push_log(format!("{slot}: {file_name}{note}"));
        }
        Err(e) => {
            tracing::warn!("fill {slot} from {} failed: {e}", path.display());
            app.ui.push_log(format!("rejected: {e}"));
            app.ui.error = Some(e.to_string());
        }
    }
    Ok(())
}

/// フォーカス中スロットの画像を外す。
pub fn clear_focused_slot(app: &mut App) {
    let Some(slot) = app.selected_slot().map(str::to_owned) else {
        return;
    };
    match app.registry.clear_slot(&slot) {
        Ok(true) => app.ui.push_log(format!("{slot}: removed")),
        Ok(false) => {}
        Err(e) => app.ui.error = Some(e.to_string()),
    }
}

/// 検証して送信をWorkerへ依頼する。送信中の再要求は何もしない。
pub async fn request_submit(app: &mut App) -> Result<()> {
    match app.controller.begin(&app.brand_name, &app.registry) {
        Ok(Some((ticket, request))) => {
            app.ui.error = None;
            app.ui.result = None;
            app.ui.status = "Analyzing...".into();
            app.ui.push_log(format!(
                "submitting {} images for {}",
                request.images().len(),
                request.brand_name()
            ));
            app.worker_tx
                .send(WorkerCmd::Submit { ticket, request })
                .await?;
        }
        Ok(None) => {
            tracing::debug!("submit pressed while in flight");
        }
        Err(e) => {
            // 入力エラーはフォーム上に表示し、何も送らない。
            app.ui.error = Some(e.to_string());
        }
    }
    Ok(())
}

/// 設定画面の編集内容を保存し、Workerへ反映させる。
pub async fn save_settings(app: &mut App) -> Result<()> {
    app.cfg.server.base_url = app.base_url.trim().to_string();
    app.cfg.server.detect_path = app.detect_path.trim().to_string();
    app.cfg.server.csrf_token = app.csrf_token.trim().to_string();
    app.cfg.save(&app.cfg_path)?;
    app.worker_tx
        .send(WorkerCmd::SaveSettings(app.cfg.clone()))
        .await?;
    app.ui.status = "Settings saved".into();
    Ok(())
}

/// 設定画面用の編集バッファを設定値から再読み込みする。
pub fn reload_settings_buffers(app: &mut App) {
    app.base_url = app.cfg.server.base_url.clone();
    app.detect_path = app.cfg.server.detect_path.clone();
    app.csrf_token = app.cfg.server.csrf_token.clone();
}

/// ドロップ・貼り付けされた文字列をファイルパスへ直す。
///
/// 端末によって `'...'` で囲む、空白を `\ ` でエスケープする、
/// `file://` URIで渡す、のいずれかになる。
pub fn normalize_dropped_path(raw: &str) -> Result<PathBuf> {
    let s = raw.trim();
    let s = s
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
        .unwrap_or(s);

    if let Some(rest) = s.strip_prefix("file://") {
        // ホスト部は最初の `/` まで。空か localhost 以外は他マシンのファイル。
        let (host, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        if !(host.is_empty() || host.eq_ignore_ascii_case("localhost")) {
            anyhow::bail!("file URI on another host is not supported: {host}");
        }
        if path.is_empty() {
            anyhow::bail!("file URI has no path: {s}");
        }
        let decoded = urlencoding::decode(path)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| path.to_string());
        return Ok(PathBuf::from(decoded));
    }

    if s.contains("\\ ") && !Path::new(s).exists() {
        return Ok(PathBuf::from(s.replace("\\ ", " ")));
    }
    Ok(PathBuf::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::detect::DetectError,
        submission::{DetectionReport, SubmitState},
    };
    use std::io::Write as _;

    /// Workerを起動せずにAppを作り、送られたコマンドを受け取れるようにする。
    fn test_app() -> (App, mpsc::Receiver<WorkerCmd>, mpsc::Sender<WorkerEvent>) {
        let (tx_cmd, rx_cmd) = mpsc::channel(16);
        let (tx_ev, rx_ev) = mpsc::channel(16);
        let mut cfg = Config::default();
        cfg.feedback.open_dashboard_on_success = false;
        let dir = std::env::temp_dir().join("photocheck-tui-test-config.toml");
        let app = App::new(dir, cfg, Shortcuts::default(), tx_cmd, rx_ev).unwrap();
        (app, rx_cmd, tx_ev)
    }

    fn write_png(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&[0x89, b'P', b'N', b'G', 0, 1, 2, 3]).unwrap();
        path
    }

    #[test]
    fn test_normalize_dropped_path_variants() {
        // 端末ごとのドロップ表現を同じパスへ直す。
        let norm = |s: &str| normalize_dropped_path(s).unwrap();
        assert_eq!(
            norm("  '/tmp/front shot.png'\n"),
            PathBuf::from("/tmp/front shot.png")
        );
        assert_eq!(norm("\"/tmp/a.png\""), PathBuf::from("/tmp/a.png"));
        assert_eq!(
            norm("file:///tmp/My%20Photo.jpg"),
            PathBuf::from("/tmp/My Photo.jpg")
        );
        assert_eq!(norm("file://localhost/tmp/x.png"), PathBuf::from("/tmp/x.png"));
        assert_eq!(norm("file://LOCALHOST/tmp/x.png"), PathBuf::from("/tmp/x.png"));
        assert_eq!(
            norm("/no/such/dir/My\\ Photo.png"),
            PathBuf::from("/no/such/dir/My Photo.png")
        );
    }

    #[test]
    fn test_normalize_refuses_remote_file_uri() {
        // 他ホストのURIを相対パスに化けさせない。
        let err = normalize_dropped_path("file://nas/share/a.png").unwrap_err();
        assert!(err.to_string().contains("nas"));
        let err = normalize_dropped_path("file://localhostile/a.png").unwrap_err();
        assert!(err.to_string().contains("localhostile"));
        assert!(normalize_dropped_path("file://localhost").is_err());
    }

    #[tokio::test]
    async fn test_fill_slot_with_remote_uri_shows_error() {
        // 同名の相対パスがあっても読み込まずエラーを出す。
        let (mut app, mut rx, _tx) = test_app();
        fill_slot(&mut app, 0, "file://nas/share/a.png").await.unwrap();
        assert!(!app.registry.get("front").unwrap().is_filled());
        assert!(app.ui.error.as_deref().is_some_and(|e| e.contains("nas")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fill_slot_rejects_oversized_file() {
        // 上限超えのファイルは読み込まれずスロットも空のまま。
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.png");
        std::fs::File::create(&path)
            .unwrap()
            .set_len(64 * 1024 * 1024)
            .unwrap();
        let (mut app, mut rx, _tx) = test_app();

        fill_slot(&mut app, 0, path.to_str().unwrap()).await.unwrap();

        assert!(!app.registry.get("front").unwrap().is_filled());
        assert!(app.ui.error.as_deref().is_some_and(|e| e.contains("too large")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_first_slot_is_focused_and_moves() {
        // 起動時は先頭スロットが強調表示され、移動で付け替わる。
        let (mut app, _rx, _tx) = test_app();
        assert!(app.registry.view().panel("front").highlighted);

        focus_slot(&mut app, 1);
        assert_eq!(app.selected_slot(), Some("back"));
        assert!(!app.registry.view().panel("front").highlighted);
        assert!(app.registry.view().panel("back").highlighted);

        // 範囲外は無視する。
        focus_slot(&mut app, 99);
        assert_eq!(app.ui.selected, 1);
    }

    #[tokio::test]
    async fn test_fill_slot_requests_preview() {
        // 読み込めた画像はスロットに入り、プレビュー生成が依頼される。
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "front.png");
        let (mut app, mut rx, _tx) = test_app();

        fill_slot(&mut app, 0, &format!("'{}'", path.display()))
            .await
            .unwrap();

        assert!(app.registry.get("front").unwrap().is_filled());
        assert!(app.ui.error.is_none());
        match rx.try_recv().unwrap() {
            WorkerCmd::RenderPreview(job) => {
                assert_eq!(job.slot, "front");
                handle_worker_event(&mut app, WorkerEvent::PreviewReady(job.render()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(app.registry.view().panel("front").preview_line.is_some());
    }

    #[tokio::test]
    async fn test_fill_slot_rejects_non_image() {
        // 画像以外は入らず、エラーが表示される。
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let (mut app, mut rx, _tx) = test_app();

        fill_slot(&mut app, 0, path.to_str().unwrap()).await.unwrap();

        assert!(!app.registry.get("front").unwrap().is_filled());
        assert!(app.ui.error.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_submit_without_brand_shows_error() {
        // ブランド名が無ければ送信されずエラーになる。
        let (mut app, mut rx, _tx) = test_app();
        request_submit(&mut app).await.unwrap();
        assert_eq!(app.ui.error.as_deref(), Some("brand name required"));
        assert_eq!(app.controller.state(), &SubmitState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_submit_roundtrip_through_worker_events() {
        // 送信→結果受信→通知期限切れでIdleに戻る。
        let dir = tempfile::tempdir().unwrap();
        let (mut app, mut rx, _tx) = test_app();
        fill_slot(&mut app, 0, write_png(&dir, "f.png").to_str().unwrap())
            .await
            .unwrap();
        fill_slot(&mut app, 1, write_png(&dir, "b.png").to_str().unwrap())
            .await
            .unwrap();
        app.brand_name = "  Nike ".into();

        request_submit(&mut app).await.unwrap();
        // 送信中の再要求は何も送らない。
        request_submit(&mut app).await.unwrap();

        let mut ticket = None;
        while let Ok(cmd) = rx.try_recv() {
            if let WorkerCmd::Submit { ticket: t, request } = cmd {
                assert!(ticket.is_none(), "submitted twice");
                assert_eq!(request.brand_name(), "Nike");
                ticket = Some(t);
            }
        }
        let ticket = ticket.expect("submit command");
        assert_eq!(app.ui.status, "Analyzing...");

        handle_worker_event(
            &mut app,
            WorkerEvent::SubmissionFinished {
                ticket,
                result: Ok(DetectionReport {
                    is_fake: true,
                    confidence: 0.87,
                    message: "Likely counterfeit".into(),
                    processing_time_secs: 1.2,
                }),
            },
        );
        assert!(app.ui.result.as_ref().is_some_and(|r| r.is_fake));
        let n = app.ui.notification.as_ref().unwrap();
        assert_eq!(n.kind, NoticeKind::Success);
        assert_eq!(n.message, "Analysis Complete!");
        assert_eq!(app.controller.state(), &SubmitState::Succeeded);

        expire_notification(&mut app, Instant::now() + Duration::from_secs(60));
        assert!(app.ui.notification.is_none());
        assert_eq!(app.controller.state(), &SubmitState::Idle);
    }

    #[tokio::test]
    async fn test_failure_shows_server_message() {
        // サーバのエラーメッセージが通知にそのまま出る。
        let dir = tempfile::tempdir().unwrap();
        let (mut app, mut rx, _tx) = test_app();
        fill_slot(&mut app, 0, write_png(&dir, "f.png").to_str().unwrap())
            .await
            .unwrap();
        fill_slot(&mut app, 1, write_png(&dir, "b.png").to_str().unwrap())
            .await
            .unwrap();
        app.brand_name = "Adidas".into();
        request_submit(&mut app).await.unwrap();

        let ticket = std::iter::from_fn(|| rx.try_recv().ok())
            .find_map(|cmd| match cmd {
                WorkerCmd::Submit { ticket, .. } => Some(ticket),
                _ => None,
            })
            .unwrap();
        handle_worker_event(
            &mut app,
            WorkerEvent::SubmissionFinished {
                ticket,
                result: Err(DetectError::Server {
                    status: 400,
                    message: Some("Unsupported brand".into()),
                }),
            },
        );

        let n = app.ui.notification.as_ref().unwrap();
        assert_eq!(n.kind, NoticeKind::Error);
        assert_eq!(n.message, "Unsupported brand");
        assert!(app.ui.result.is_none());
    }

    #[tokio::test]
    async fn test_settings_save_sends_new_config() {
        // 保存で設定ファイルが書かれ、Workerへ新しい設定が届く。
        let dir = tempfile::tempdir().unwrap();
        let (mut app, mut rx, _tx) = test_app();
        app.cfg_path = dir.path().join("config.toml");
        app.base_url = " http://10.0.0.5:9000 ".into();

        save_settings(&mut app).await.unwrap();

        assert!(app.cfg_path.exists());
        match rx.try_recv().unwrap() {
            WorkerCmd::SaveSettings(cfg) => {
                assert_eq!(cfg.server.base_url, "http://10.0.0.5:9000")
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
