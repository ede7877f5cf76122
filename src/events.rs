//! 画面遷移用のUI状態、画面種別、通知。

use std::time::{Duration, Instant};

use crate::submission::DetectionReport;

/// ログパネルに保持する最大行数。
const LOG_CAP: usize = 200;

/// TUIで現在表示中の画面。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    /// アップロードフォーム画面。
    Main,
    /// 設定編集画面。
    Settings,
}

/// 通知の種類（色分けに使う）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// 一定時間で消える通知。
#[derive(Clone, Debug)]
pub struct Notification {
    pub kind: NoticeKind,
    pub message: String,
    shown_at: Instant,
    ttl: Duration,
}

impl Notification {
    /// 表示開始時刻を現在として通知を作る。
    pub fn new(kind: NoticeKind, message: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kind,
            message: message.into(),
            shown_at: Instant::now(),
            ttl,
        }
    }

    /// 表示期限を過ぎたか判定する。
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.shown_at) >= self.ttl
    }
}

/// 描画側と共有するUI状態。
#[derive(Clone, Debug)]
pub struct UiState {
    /// 現在の画面。
    pub screen: Screen,
    /// フォーカス中のスロット（宣言順インデックス）。
    pub selected: usize,
    /// 右側パネルに表示するログ。
    pub log: Vec<String>,
    /// 画面下部のステータス文言。
    pub status: String,
    /// 入力エラー（強調表示用）。
    pub error: Option<String>,
    /// 画面右上の通知。
    pub notification: Option<Notification>,
    /// 直近の判定結果。
    pub result: Option<DetectionReport>,
}

impl UiState {
    /// 初期状態を作る。
    pub fn new(screen: Screen) -> Self {
        Self {
            screen,
            selected: 0,
            log: vec![],
            status: "Ready".into(),
            error: None,
            notification: None,
            result: None,
        }
    }

    /// 時刻付きでログを追加し、古い行を捨てる。
    pub fn push_log(&mut self, msg: impl AsRef<str>) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.log.push(format!("[{stamp}] {}", msg.as_ref()));
        if self.log.len() > LOG_CAP {
            let excess = self.log.len() - LOG_CAP;
            self.log.drain(..excess);
        }
    }
}
