//! レイアウト計算のヘルパー関数

use ratatui::prelude::*;

/// メインレイアウトの3つの領域
pub struct MainLayout {
    /// Slots Table + INFO Panelの領域
    pub body: Rect,
    /// HELPバーの領域
    pub help_bar: Rect,
    /// STATUSバーの領域
    pub status_bar: Rect,
}

/// ボディ部の領域（左: スロット一覧、右: フォーム情報/結果/ログ）
pub struct BodyLayout {
    /// Slots Tableの領域
    pub slots_table: Rect,
    /// ブランド名・送信状態の領域
    pub form_panel: Rect,
    /// 判定結果の領域
    pub result_panel: Rect,
    /// ログの領域
    pub log_panel: Rect,
}

/// メイン画面を3つの領域に分割（Body + HELP + STATUS）
pub fn create_main_layout(area: Rect) -> MainLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),    // Body
            Constraint::Length(3), // HELPバー
            Constraint::Length(3), // STATUSバー
        ])
        .split(area);

    MainLayout {
        body: chunks[0],
        help_bar: chunks[1],
        status_bar: chunks[2],
    }
}

/// Body領域を分割（Slots Table 60% + 右列 40%、右列は縦に3段）
pub fn create_body_layout(area: Rect) -> BodyLayout {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(60), // Slots Table
            Constraint::Percentage(40), // 右列
        ])
        .split(area);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // FORM
            Constraint::Length(7), // RESULT
            Constraint::Min(3),    // LOG
        ])
        .split(columns[1]);

    BodyLayout {
        slots_table: columns[0],
        form_panel: right[0],
        result_panel: right[1],
        log_panel: right[2],
    }
}

/// 画面右上の通知領域
pub fn notification_area(area: Rect, width: u16) -> Rect {
    // 幅は画面に収まるよう切り詰め、上端から1行あける。
    let w = width.min(area.width);
    Rect {
        x: area.x + area.width - w,
        y: area.y + area.height.min(1),
        width: w,
        height: area.height.saturating_sub(1).min(3),
    }
}
