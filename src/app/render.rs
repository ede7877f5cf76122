//! TUI描画関連の関数。

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Row, Table, TableState, Wrap},
};

use crate::{
    config::join_url,
    events::{NoticeKind, Screen},
    input, layout,
    shortcuts::Shortcuts,
    slots::{SlotState, UploadSlot},
    submission::{DetectionReport, SubmitState},
    view::human_size,
};

use super::App;

/// 通知ポップアップの幅。
const NOTICE_WIDTH: u16 = 44;

/// 画面全体のレイアウトを描画する。
pub fn draw(f: &mut Frame, app: &App) {
    // メインレイアウト（Body + HELP + STATUS）を作る。
    let main_layout = layout::create_main_layout(f.area());

    match app.ui.screen {
        Screen::Main => draw_form(f, app, main_layout.body),
        Screen::Settings => draw_settings(f, app, main_layout.body),
    }

    // HELPバー（画面ごとのショートカット）を描画する。
    let help_text = get_help_text(&app.ui.screen, &app.shortcuts);
    let help_bar = Paragraph::new(help_text)
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_bar, main_layout.help_bar);

    // STATUSバー（画面名・送信状態・エラー）を描画する。
    f.render_widget(build_status_bar(app), main_layout.status_bar);

    // 通知は右上に重ねる。
    if let Some(n) = &app.ui.notification {
        let area = layout::notification_area(f.area(), NOTICE_WIDTH);
        let (title, color) = match n.kind {
            NoticeKind::Success => ("OK", Color::Green),
            NoticeKind::Error => ("ERROR", Color::Red),
        };
        f.render_widget(Clear, area);
        let popup = Paragraph::new(n.message.clone())
            .block(Block::default().borders(Borders::ALL).title(title))
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .wrap(Wrap { trim: true });
        f.render_widget(popup, area);
    }

    // 入力ボックスが開いていれば重ねて描画する。
    if let Some(input_state) = &app.input_box {
        input::render_input_box(f, input_state);
    }
}

/// アップロードフォーム（スロット一覧 + FORM/RESULT/LOG）を描画する。
fn draw_form(f: &mut Frame, app: &App, area: Rect) {
    let body_layout = layout::create_body_layout(area);
    let panels = app.registry.view();

    // スロットごとにテーブル行を組み立てる。
    let rows = app.registry.slots().iter().map(|s| {
        let panel = panels.panel(&s.name);
        let marker = if panel.highlighted { "▶" } else { " " };
        let (file, size) = match s.file() {
            Some(file) => (file.file_name.clone(), human_size(file.size())),
            None => ("-".into(), "".into()),
        };
        Row::new(vec![
            marker.to_string(),
            s.name.clone(),
            (if s.required { "required" } else { "optional" }).to_string(),
            slot_state_str(s).to_string(),
            file,
            size,
            panel.preview_line.unwrap_or_default(),
        ])
    });

    // スロットテーブルのウィジェットを構築する。
    let table = Table::new(
        rows,
        [
            Constraint::Length(1),
            Constraint::Length(9),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(18),
            Constraint::Length(10),
            Constraint::Min(10),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("IMAGES"))
    .header(Row::new(vec!["", "slot", "", "state", "file", "size", "preview"]).bold())
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(255, 140, 0)) // オレンジ色の背景
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    );

    // フォーカス中の行をハイライトする。
    let mut table_state = TableState::default();
    if !app.registry.slots().is_empty() {
        table_state.select(Some(app.ui.selected));
    }
    f.render_stateful_widget(table, body_layout.slots_table, &mut table_state);

    // FORMパネル：ブランド名と送信可否。
    let form = Paragraph::new(build_form_text(app))
        .block(Block::default().borders(Borders::ALL).title("FORM"))
        .wrap(Wrap { trim: true });
    f.render_widget(form, body_layout.form_panel);

    // RESULTパネル：直近の判定結果。
    let result = Paragraph::new(build_result_text(app))
        .block(Block::default().borders(Borders::ALL).title("RESULT"))
        .wrap(Wrap { trim: true });
    f.render_widget(result, body_layout.result_panel);

    // LOGパネル：枠内に収まる最新行だけ表示する。
    let room = body_layout.log_panel.height.saturating_sub(2) as usize;
    let start = app.ui.log.len().saturating_sub(room);
    let log = Paragraph::new(app.ui.log[start..].join("\n"))
        .block(Block::default().borders(Borders::ALL).title("LOG"));
    f.render_widget(log, body_layout.log_panel);
}

/// FORMパネルの文字列を構築する。
fn build_form_text(app: &App) -> String {
    let brand = app.brand_name.trim();
    let brand = if brand.is_empty() { "(not set)" } else { brand };
    let filled = app.registry.slots().iter().filter(|s| s.is_filled()).count();

    let readiness = match app.registry.first_missing_required() {
        _ if app.registry.is_ready() && filled > 0 => "ready".to_string(),
        Some(missing) => format!("missing {missing}"),
        None => "no images".into(),
    };

    let state = match app.controller.state() {
        SubmitState::Idle | SubmitState::Validating => "Idle",
        SubmitState::Submitting { .. } => "Analyzing...",
        SubmitState::Succeeded => "Done",
        SubmitState::Failed => "Failed",
    };

    format!(
        "Brand: {brand}\nImages: {filled}/{} ({readiness})\nSubmit: {state}",
        app.registry.len()
    )
}

/// RESULTパネルの文字列を構築する。
fn build_result_text(app: &App) -> Text<'static> {
    if app.controller.is_submitting() {
        return Text::from("Analyzing...");
    }
    match &app.ui.result {
        Some(report) => report_text(report),
        None => Text::from("No result yet"),
    }
}

/// 判定結果を色付きの行にする。
fn report_text(report: &DetectionReport) -> Text<'static> {
    let (verdict, color) = if report.is_fake {
        ("FAKE", Color::Red)
    } else {
        ("AUTHENTIC", Color::Green)
    };
    Text::from(vec![
        Line::from(verdict).style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Line::from(report.message.clone()),
        Line::from(format!("Confidence: {:.2}%", report.confidence * 100.0)),
        Line::from(format!(
            "Processing time: {:.2}s",
            report.processing_time_secs
        )),
    ])
}

/// 設定画面を描画する。
fn draw_settings(f: &mut Frame, app: &App, area: Rect) {
    // トークンは伏せ字で表示し、空なら取得元を示す。
    let token = if app.csrf_token.is_empty() {
        format!(
            "(fetched from {})",
            join_url(&app.cfg.server.base_url, &app.cfg.server.form_path)
        )
    } else {
        "•".repeat(app.csrf_token.chars().count())
    };

    let text = format!(
        "Base URL:     {}\nDetect path:  {}\nCSRF token:   {}\n\nEndpoint:     {}\nTimeout:      {}s\nMax file:     {}\nConfig file:  {}",
        app.base_url,
        app.detect_path,
        token,
        join_url(app.base_url.trim(), app.detect_path.trim()),
        app.cfg.request_timeout().as_secs(),
        human_size(app.cfg.limits.max_file_bytes),
        app.cfg_path.display(),
    );

    let panel = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("SETTINGS"))
        .wrap(Wrap { trim: false });
    f.render_widget(panel, area);
}

/// ステータスバーを構築する。
fn build_status_bar(app: &App) -> Paragraph<'static> {
    let screen_name = match app.ui.screen {
        Screen::Main => "Main",
        Screen::Settings => "Settings",
    };

    // エラーの有無でステータス文字列を切り替える。
    let status_text = if let Some(err) = &app.ui.error {
        format!("[{}] ERROR: {}", screen_name, err)
    } else {
        format!("[{}] {}", screen_name, app.ui.status)
    };

    let mut status_bar = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });

    // エラー時は赤色で強調表示する。
    if app.ui.error.is_some() {
        status_bar = status_bar.style(Style::default().fg(Color::Red));
    }

    status_bar
}

/// 現在画面に応じたヘルプ文字列を返す。
fn get_help_text(screen: &Screen, shortcuts: &Shortcuts) -> String {
    match screen {
        Screen::Main => format!(
            "{}/{}: slot | {}: pick file (or drop) | {}: remove | {}: brand | {}: submit | {}: dismiss | {}: settings | {}: quit",
            format_keys(&shortcuts.main.up),
            format_keys(&shortcuts.main.down),
            format_keys(&shortcuts.main.pick_file),
            format_keys(&shortcuts.main.remove_file),
            format_keys(&shortcuts.main.brand),
            format_keys(&shortcuts.main.submit),
            format_keys(&shortcuts.main.dismiss),
            format_keys(&shortcuts.main.settings),
            format_keys(&shortcuts.main.quit),
        ),
        Screen::Settings => format!(
            "{}: base URL | {}: detect path | {}: CSRF token | {}: save | {}: cancel",
            format_keys(&shortcuts.settings.base_url),
            format_keys(&shortcuts.settings.detect_path),
            format_keys(&shortcuts.settings.csrf_token),
            format_keys(&shortcuts.settings.save),
            format_keys(&shortcuts.settings.cancel),
        ),
    }
}

/// ショートカットキーの配列を表示用文字列に変換する。
fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}

/// スロット状態を一覧表示用の短いラベルへ変換する。
fn slot_state_str(slot: &UploadSlot) -> &'static str {
    match (&slot.state, slot.preview()) {
        (SlotState::Empty, _) => "empty",
        (SlotState::Filled { .. }, None) => "loading",
        (SlotState::Filled { .. }, Some(_)) => "ready",
    }
}
