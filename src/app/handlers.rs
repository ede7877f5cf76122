//! キー入力・貼り付けの処理。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::{
    App, clear_focused_slot, dismiss_notification, fill_slot, focus_slot, reload_settings_buffers,
    request_submit, save_settings,
};
use crate::{
    events::Screen,
    input::{InputBoxState, InputCallbackId},
    shortcuts,
};

/// Ctrl+Cか判定する。
pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

/// キー入力を処理する。終了すべきならtrueを返す。
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックス表示中は最優先で処理する。
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }

    match app.ui.screen {
        Screen::Main => handle_main_key(app, k).await,
        Screen::Settings => handle_settings_key(app, k).await,
    }
}

/// 貼り付け（ファイルのドロップを含む）を処理する。
pub async fn handle_paste(app: &mut App, text: &str) -> Result<()> {
    if let Some(input_state) = &mut app.input_box {
        // 入力中なら入力欄へそのまま挿入する。
        input_state.insert_str(text);
    } else if app.ui.screen == Screen::Main {
        // フォーカス中のスロットへドロップしたものとして扱う。
        let idx = app.ui.selected;
        fill_slot(app, idx, text).await?;
    }
    Ok(())
}

/// メイン画面のキー処理。
async fn handle_main_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.main;

    if shortcuts::matches_shortcut(&k, &sc.quit) {
        // アプリを終了する。
        return Ok(true);
    } else if shortcuts::matches_shortcut(&k, &sc.settings) {
        // 現在値を編集バッファへ読み込んで設定画面へ。
        reload_settings_buffers(app);
        app.ui.screen = Screen::Settings;
    } else if shortcuts::matches_shortcut(&k, &sc.down) {
        // 次のスロットへ。
        let next = app.ui.selected + 1;
        focus_slot(app, next);
    } else if shortcuts::matches_shortcut(&k, &sc.up) {
        // 前のスロットへ。
        let prev = app.ui.selected.saturating_sub(1);
        focus_slot(app, prev);
    } else if shortcuts::matches_shortcut(&k, &sc.pick_file) {
        // フォーカス中スロットの画像パスを入力してもらう。
        let idx = app.ui.selected;
        if let Some(slot) = app.selected_slot().map(str::to_owned) {
            app.input_box = Some(InputBoxState::new(
                format!("Image file for {slot} (path or drop here):"),
                "",
                InputCallbackId::SlotPath(idx),
            ));
        }
    } else if shortcuts::matches_shortcut(&k, &sc.remove_file) {
        clear_focused_slot(app);
    } else if shortcuts::matches_shortcut(&k, &sc.brand) {
        // ブランド名を編集する。
        app.input_box = Some(InputBoxState::new(
            "Brand name:",
            &app.brand_name,
            InputCallbackId::BrandName,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.submit) {
        request_submit(app).await?;
    } else if shortcuts::matches_shortcut(&k, &sc.dismiss) {
        // 通知とエラー表示を閉じる。
        dismiss_notification(app);
        app.ui.error = None;
    }

    Ok(false)
}

/// 設定画面のキー処理。
async fn handle_settings_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.settings;

    if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 編集内容を破棄してメイン画面へ戻る。
        reload_settings_buffers(app);
        app.ui.screen = Screen::Main;
    } else if shortcuts::matches_shortcut(&k, &sc.save) {
        // 保存してメイン画面へ戻る。
        save_settings(app).await?;
        app.ui.screen = Screen::Main;
    } else if shortcuts::matches_shortcut(&k, &sc.base_url) {
        app.input_box = Some(InputBoxState::new(
            "Server base URL:",
            &app.base_url,
            InputCallbackId::SettingsBaseUrl,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.detect_path) {
        app.input_box = Some(InputBoxState::new(
            "Detection endpoint path:",
            &app.detect_path,
            InputCallbackId::SettingsDetectPath,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.csrf_token) {
        // 空にするとフォームページから取得する。
        app.input_box = Some(
            InputBoxState::new(
                "CSRF token (empty = fetch from form page):",
                &app.csrf_token,
                InputCallbackId::SettingsCsrfToken,
            )
            .masked(),
        );
    }

    Ok(false)
}

/// 入力ボックスのキー処理。
async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックスが無ければ何もしない。
    let Some(input_state) = &mut app.input_box else {
        return Ok(false);
    };

    // 入力ボックス用ショートカットを参照する。
    let sc = &app.shortcuts.input_box;

    if shortcuts::matches_shortcut(&k, &sc.confirm) {
        // 入力ボックスを閉じる前に値とコールバック種別を保存する。
        let value = input_state.value.clone();
        let callback_id = input_state.callback_id.clone();
        app.input_box = None;

        // コールバック種別に応じて値を反映する。
        apply_input_callback(app, callback_id, value).await?;
    } else if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 入力を破棄して入力ボックスを閉じる。
        app.input_box = None;
    } else if shortcuts::matches_shortcut(&k, &sc.backspace) {
        input_state.backspace();
    } else if shortcuts::matches_shortcut(&k, &sc.delete) {
        input_state.delete();
    } else if shortcuts::matches_shortcut(&k, &sc.left) {
        input_state.move_left();
    } else if shortcuts::matches_shortcut(&k, &sc.right) {
        input_state.move_right();
    } else if shortcuts::matches_shortcut(&k, &sc.home) {
        input_state.move_home();
    } else if shortcuts::matches_shortcut(&k, &sc.end) {
        input_state.move_end();
    } else if shortcuts::matches_shortcut(&k, &sc.clear_line) {
        input_state.clear_line();
    } else if let KeyCode::Char(c) = k.code {
        // コントロールキーでない場合のみ挿入する。
        if !k.modifiers.contains(KeyModifiers::CONTROL) {
            input_state.insert_char(c);
        }
    }

    Ok(false)
}

/// 入力ボックスのコールバックを適用する。
async fn apply_input_callback(
    app: &mut App,
    callback_id: InputCallbackId,
    value: String,
) -> Result<()> {
    match callback_id {
        InputCallbackId::BrandName => {
            // 前後の空白は送信時の検証で落とす。
            app.brand_name = value;
            app.ui.error = None;
        }
        InputCallbackId::SlotPath(idx) => {
            if !value.trim().is_empty() {
                fill_slot(app, idx, &value).await?;
            }
        }
        InputCallbackId::SettingsBaseUrl => app.base_url = value,
        InputCallbackId::SettingsDetectPath => app.detect_path = value,
        InputCallbackId::SettingsCsrfToken => app.csrf_token = value,
    }
    Ok(())
}
