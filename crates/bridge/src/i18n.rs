//! User-facing bridge messages in Ukrainian (default) and English.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Uk,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Uk => "uk",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uk" => Ok(Language::Uk),
            "en" => Ok(Language::En),
            other => Err(format!("Unsupported language '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    AppTitle,
    StatusWaiting,
    StatusConnected,
    StatusSyncing,
    StatusMt5Error,
    LogStarted,
    LogEnterCredentials,
    LogConfigFromBrowser,
    LogConfigSaved,
    LogServerNotified,
    LogServerNotifyFailed,
    LogSyncRequested,
    LogDealsSent,
    LogSyncDone,
    LogError,
    MsgNoNewDeals,
    MsgSyncedNDeals,
    MsgSendDealsFailed,
    MsgMt5ConnectFailed,
    MsgMt5Hint,
    ApiDescription,
    ApiStatusConnected,
    ApiStatusNotConnected,
    ApiConfigEndpoint,
    ApiSyncEndpoint,
}

impl Text {
    pub fn get(self, lang: Language) -> &'static str {
        let (uk, en) = match self {
            Text::AppTitle => ("TradeTrack Sync", "TradeTrack Sync"),
            Text::StatusWaiting => (
                "Очікую підключення з сайту. Виконайте кроки інструкції в браузері.",
                "Waiting for connection from the site. Follow the steps in your browser.",
            ),
            Text::StatusConnected => (
                "Підключено. Очікую натискання «Отримати угоди» на сайті.",
                "Connected. Waiting for «Get trades» on the site.",
            ),
            Text::StatusSyncing => ("Синхронізація угод…", "Syncing deals…"),
            Text::StatusMt5Error => (
                "Помилка підключення до MT5. Перевірте логін, пароль і сервер.",
                "MT5 connection error. Check login, password and server.",
            ),
            Text::LogStarted => (
                "Програма запущена. Очікую підключення з браузера.",
                "Program started. Waiting for connection from browser.",
            ),
            Text::LogEnterCredentials => (
                "На сайті введіть логін MT5, пароль і сервер та натисніть «Підключити».",
                "On the site enter MT5 login, password and server, then click «Connect».",
            ),
            Text::LogConfigFromBrowser => {
                ("Конфіг отримано з браузера.", "Config received from browser.")
            }
            Text::LogConfigSaved => ("Конфіг збережено.", "Config saved."),
            Text::LogServerNotified => (
                "Сервер TradeTrack повідомлено про підключення.",
                "TradeTrack server notified of connection.",
            ),
            Text::LogServerNotifyFailed => (
                "Не вдалося повідомити сервер TradeTrack (перевірте мережу або URL).",
                "Could not notify TradeTrack server (check network or URL).",
            ),
            Text::LogSyncRequested => (
                "Отримано запит «Отримати угоди» з сайту.",
                "Received «Get trades» request from the site.",
            ),
            Text::LogDealsSent => (
                "Угоди успішно відправлено на TradeTrack.",
                "Deals sent to TradeTrack successfully.",
            ),
            Text::LogSyncDone => ("Синхронізація завершена.", "Sync complete."),
            Text::LogError => ("Помилка:", "Error:"),
            Text::MsgNoNewDeals => ("Немає нових угод.", "No new deals."),
            Text::MsgSyncedNDeals => ("Синхронізовано {} угод.", "Synced {} deals."),
            Text::MsgSendDealsFailed => (
                "Не вдалося відправити угоди на сервер.",
                "Failed to send deals to the server.",
            ),
            Text::MsgMt5ConnectFailed => {
                ("Помилка підключення MT5: {}", "MT5 connection failed: {}")
            }
            Text::MsgMt5Hint => (
                " (перевірте «Автоторгівля» в MT5 та інвестор-пароль)",
                " (check «Allow automated trading» in MT5 and investor password)",
            ),
            Text::ApiDescription => (
                "Клієнт TradeTrack для підключення MT5 до акаунту на сайті. Синхронізація тільки по запиту з фронту.",
                "TradeTrack client for connecting MT5 to your site account. Sync only on request from the frontend.",
            ),
            Text::ApiStatusConnected => {
                ("Підключено (конфіг збережено)", "Connected (config saved)")
            }
            Text::ApiStatusNotConnected => (
                "Не підключено — надішліть конфіг з браузера",
                "Not connected — send config from browser",
            ),
            Text::ApiConfigEndpoint => (
                "POST /config — підключення з браузера",
                "POST /config — connect from browser",
            ),
            Text::ApiSyncEndpoint => (
                "GET|POST /sync-request — отримати угоди (кнопка «Отримати угоди» на сайті)",
                "GET|POST /sync-request — get deals (button «Get trades» on site)",
            ),
        };
        match lang {
            Language::Uk => uk,
            Language::En => en,
        }
    }

    /// The text with its `{}` placeholder filled in.
    pub fn format(self, lang: Language, arg: impl fmt::Display) -> String {
        self.get(lang).replacen("{}", &arg.to_string(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_language_is_ukrainian() {
        assert_eq!(Language::default(), Language::Uk);
        assert_eq!(Text::LogSyncDone.get(Language::default()), "Синхронізація завершена.");
    }

    #[test]
    fn test_format_fills_placeholder() {
        assert_eq!(Text::MsgSyncedNDeals.format(Language::En, 3), "Synced 3 deals.");
        assert_eq!(Text::MsgSyncedNDeals.format(Language::Uk, 3), "Синхронізовано 3 угод.");
    }

    #[test]
    fn test_parse_language() {
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert!("de".parse::<Language>().is_err());
        assert_eq!(serde_json::to_string(&Language::Uk).unwrap(), "\"uk\"");
    }
}
