//! ショートカット設定の管理。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ショートカット設定の全体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shortcuts {
    pub main: MainShortcuts,
    pub settings: SettingsShortcuts,
    pub input_box: InputBoxShortcuts,
}

/// メイン（アップロードフォーム）画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainShortcuts {
    pub quit: Vec<String>,
    pub settings: Vec<String>,
    pub up: Vec<String>,
    pub down: Vec<String>,
    /// フォーカス中スロットのファイル選択。
    pub pick_file: Vec<String>,
    /// フォーカス中スロットの画像を外す。
    pub remove_file: Vec<String>,
    pub brand: Vec<String>,
    pub submit: Vec<String>,
    /// 通知を閉じる。
    pub dismiss: Vec<String>,
}

/// 設定画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsShortcuts {
    pub cancel: Vec<String>,
    pub save: Vec<String>,
    pub base_url: Vec<String>,
    pub detect_path: Vec<String>,
    pub csrf_token: Vec<String>,
}

/// InputBoxのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Shortcuts {
    /// TOMLから読み込み、無ければデフォルトを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 未作成の場合は既定値を利用する。
            return Ok(Self::default());
        }
        // 既存ファイルを読み込んでパースする。
        let content = std::fs::read_to_string(path)?;
        let shortcuts: Shortcuts = toml::from_str(&content)?;
        // 解釈できないキー指定は警告だけ出して続行する。
        for bad in shortcuts.invalid_bindings() {
            tracing::warn!("unrecognized shortcut in {}: {bad}", path.display());
        }
        Ok(shortcuts)
    }

    /// 解釈できないキー指定を「セクション.名前=値」の形で列挙する。
    pub fn invalid_bindings(&self) -> Vec<String> {
        let m = &self.main;
        let s = &self.settings;
        let i = &self.input_box;
        let all: [(&str, &[String]); 23] = [
            ("main.quit", &m.quit),
            ("main.settings", &m.settings),
            ("main.up", &m.up),
            ("main.down", &m.down),
            ("main.pick_file", &m.pick_file),
            ("main.remove_file", &m.remove_file),
            ("main.brand", &m.brand),
            ("main.submit", &m.submit),
            ("main.dismiss", &m.dismiss),
            ("settings.cancel", &s.cancel),
            ("settings.save", &s.save),
            ("settings.base_url", &s.base_url),
            ("settings.detect_path", &s.detect_path),
            ("settings.csrf_token", &s.csrf_token),
            ("input_box.confirm", &i.confirm),
            ("input_box.cancel", &i.cancel),
            ("input_box.backspace", &i.backspace),
            ("input_box.delete", &i.delete),
            ("input_box.left", &i.left),
            ("input_box.right", &i.right),
            ("input_box.home", &i.home),
            ("input_box.end", &i.end),
            ("input_box.clear_line", &i.clear_line),
        ];
        all.iter()
            .flat_map(|(name, keys)| {
                keys.iter()
                    .filter(|k| parse_binding(k).is_none())
                    .map(move |k| format!("{name}={k}"))
            })
            .collect()
    }
}

impl Default for Shortcuts {
    fn default() -> Self {
        let keys = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        Self {
            main: MainShortcuts {
                quit: keys(&["q"]),
                settings: keys(&["t"]),
                up: keys(&["Up", "k"]),
                down: keys(&["Down", "j"]),
                pick_file: keys(&["Enter", "o"]),
                remove_file: keys(&["x", "Delete"]),
                brand: keys(&["b"]),
                submit: keys(&["s"]),
                dismiss: keys(&["Esc"]),
            },
            settings: SettingsShortcuts {
                cancel: keys(&["Esc"]),
                save: keys(&["Enter"]),
                base_url: keys(&["u"]),
                detect_path: keys(&["p"]),
                csrf_token: keys(&["c"]),
            },
            // 文字入力と衝突しないよう、カーソル移動は矢印キーのみ。
            input_box: InputBoxShortcuts {
                confirm: keys(&["Enter"]),
                cancel: keys(&["Esc"]),
                backspace: keys(&["Backspace"]),
                delete: keys(&["Delete"]),
                left: keys(&["Left"]),
                right: keys(&["Right"]),
                home: keys(&["Home"]),
                end: keys(&["End"]),
                clear_line: keys(&["Ctrl+u"]),
            },
        }
    }
}

/// "Ctrl+u" や "Enter" を (修飾キー, キーコード) に分解する。
pub fn parse_binding(binding: &str) -> Option<(KeyModifiers, KeyCode)> {
    // 最後の要素がキー、それより前が修飾キー。
    let mut parts: Vec<&str> = binding.split('+').collect();
    let key = parts.pop()?;

    // 修飾キーを積み上げる。
    let mut modifiers = KeyModifiers::empty();
    for m in parts {
        modifiers |= match m.to_ascii_lowercase().as_str() {
            "ctrl" => KeyModifiers::CONTROL,
            "alt" => KeyModifiers::ALT,
            "shift" => KeyModifiers::SHIFT,
            _ => return None,
        };
    }

    // 名前付きキー、または単一文字。
    let code = match key.to_ascii_lowercase().as_str() {
        "enter" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" => KeyCode::Delete,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return None,
            }
        }
    };
    Some((modifiers, code))
}

/// KeyEventがいずれかのショートカット文字列と一致するか判定する。
pub fn matches_shortcut(key: &KeyEvent, shortcuts: &[String]) -> bool {
    shortcuts
        .iter()
        .filter_map(|s| parse_binding(s))
        .any(|(modifiers, code)| key.modifiers == modifiers && key.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_shortcut_simple_char() {
        // 単一文字の一致判定を検証する。
        let key = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::empty());
        assert!(matches_shortcut(&key, &[String::from("s")]));
        assert!(!matches_shortcut(&key, &[String::from("x")]));
    }

    #[test]
    fn test_matches_shortcut_with_modifier() {
        // 修飾キー付きの一致判定を検証する。
        let key = KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL);
        assert!(matches_shortcut(&key, &[String::from("Ctrl+u")]));
        assert!(matches_shortcut(&key, &[String::from("ctrl+u")]));
        assert!(!matches_shortcut(&key, &[String::from("u")]));
    }

    #[test]
    fn test_matches_shortcut_multiple_keys() {
        // 複数キーバインドの一致判定を検証する。
        let bindings = Shortcuts::default().main.remove_file;
        let x = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::empty());
        let del = KeyEvent::new(KeyCode::Delete, KeyModifiers::empty());
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::empty());
        assert!(matches_shortcut(&x, &bindings));
        assert!(matches_shortcut(&del, &bindings));
        assert!(!matches_shortcut(&enter, &bindings));
    }

    #[test]
    fn test_parse_binding_rejects_garbage() {
        // 不正な指定は None になる。
        assert_eq!(parse_binding("Hyper+a"), None);
        assert_eq!(parse_binding("PageUp"), None);
        assert_eq!(parse_binding(""), None);
        assert_eq!(
            parse_binding("Alt+Enter"),
            Some((KeyModifiers::ALT, KeyCode::Enter))
        );
    }

    #[test]
    fn test_invalid_bindings_are_listed() {
        // 既定値はすべて解釈でき、壊れた指定だけが列挙される。
        let mut sc = Shortcuts::default();
        assert!(sc.invalid_bindings().is_empty());
        sc.main.submit.push("Super+s".into());
        assert_eq!(sc.invalid_bindings(), ["main.submit=Super+s"]);
    }

    #[test]
    fn test_input_box_defaults_leave_letters_free() {
        // 入力中に h/l が移動キーとして奪われないこと。
        let sc = Shortcuts::default();
        let h = KeyEvent::new(KeyCode::Char('h'), KeyModifiers::empty());
        assert!(!matches_shortcut(&h, &sc.input_box.left));
    }
}
