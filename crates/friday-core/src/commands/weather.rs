//! `/weather`: geocode a city and show current conditions.
//!
//! Step 1 waits for a city name. When the lookup is ambiguous the flow moves
//! to step 2 and keeps the candidates until the user picks one by number or
//! by button.

use async_trait::async_trait;
use friday_ipc::{InlineButton, InlineKeyboard};
use friday_weather::{Conditions, GeoCandidate, WeatherError};
use tracing::warn;

use crate::command::{Command, CommandContext, Invocation, Reply};
use crate::dispatcher::selection_data;
use crate::error::CommandError;
use crate::session::{FlowData, Session, WeatherFlow};

const COMMAND: &str = "/weather";
const STEP_AWAIT_CITY: u32 = 1;
const STEP_AWAIT_CHOICE: u32 = 2;

const USAGE: &str = "/weather - asks for a city
/weather_Seoul - weather in Seoul";

const CITY_PROMPT: &str = "🌤️ Which city would you like the weather for?
Type a city name (e.g. Seoul, London, Tokyo).

💡 Send /cancel to stop.";

pub(crate) fn country_flag(code: &str) -> String {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return "🌍".to_string();
    }
    code.to_ascii_uppercase()
        .chars()
        .filter_map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
        .collect()
}

fn weather_icon(main: &str) -> &'static str {
    match main {
        "Clear" => "☀️",
        "Clouds" => "☁️",
        "Rain" => "🌧️",
        "Drizzle" => "🌦️",
        "Thunderstorm" => "⛈️",
        "Snow" => "❄️",
        "Mist" | "Smoke" | "Haze" | "Dust" | "Fog" | "Sand" | "Ash" => "🌫️",
        "Squall" => "💨",
        "Tornado" => "🌪️",
        _ => "🌤️",
    }
}

fn temperature_unit(units: &str) -> &'static str {
    match units {
        "metric" => "°C",
        "imperial" => "°F",
        _ => "K",
    }
}

fn not_found(city: &str) -> Reply {
    Reply::text(format!(
        "❌ Could not find a city named '{}'.\nPlease check the spelling and try again.",
        city
    ))
}

fn error_reply(error: &WeatherError, city: &str) -> Reply {
    match error {
        WeatherError::NotConfigured => Reply::text(
            "🌤️ The weather service is not configured.\nPlease contact the administrator.",
        ),
        WeatherError::Unauthorized => Reply::text(
            "❌ The weather API key was rejected.\nPlease contact the administrator.",
        ),
        WeatherError::NotFound => not_found(city),
        _ => Reply::text("❌ Could not fetch the weather.\nPlease try again later."),
    }
}

pub(crate) fn format_report(place: &GeoCandidate, conditions: &Conditions, units: &str) -> String {
    let unit = temperature_unit(units);
    format!(
        "{} Weather in {} {}
━━━━━━━━━━━━━━━━━━━━━━━━
🌡️ Temperature: {:.0}{}
🤗 Feels like: {:.0}{}
💧 Humidity: {}%
☁️ Conditions: {}
📍 Location: {:.4}, {:.4}

💡 Usage: /weather",
        weather_icon(&conditions.main),
        place.display_name(),
        country_flag(&place.country),
        conditions.temp,
        unit,
        conditions.feels_like,
        unit,
        conditions.humidity,
        conditions.description,
        place.lat,
        place.lon
    )
}

fn selection_prompt(flow: &WeatherFlow, header: &str) -> Reply {
    let mut text = format!("{}\n", header);
    let mut keyboard: InlineKeyboard = Vec::with_capacity(flow.candidates.len());

    for (i, place) in flow.candidates.iter().enumerate() {
        let label = format!("{} {}", place.display_name(), country_flag(&place.country));
        text.push_str(&format!("\n{}. {}", i + 1, label));
        keyboard.push(vec![InlineButton {
            text: label,
            callback_data: selection_data(COMMAND, i + 1),
        }]);
    }

    Reply::Keyboard { text, keyboard }
}

pub struct WeatherCommand;

impl WeatherCommand {
    async fn report(&self, ctx: &CommandContext<'_>, place: &GeoCandidate) -> Reply {
        match ctx.services.weather.current(place.lat, place.lon).await {
            Ok(conditions) => Reply::Text(format_report(
                place,
                &conditions,
                &ctx.services.weather_units,
            )),
            Err(e) => {
                warn!(place = %place.name, "Current weather lookup failed: {}", e);
                error_reply(&e, place.display_name())
            }
        }
    }

    /// Geocodes `city`. A failed or empty lookup leaves the flow at step 1
    /// when `keep_on_miss` is set and clears it otherwise.
    async fn lookup(&self, ctx: &CommandContext<'_>, city: &str, keep_on_miss: bool) -> Reply {
        let candidates = match ctx.services.weather.geocode(city).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(city, "Geocoding failed: {}", e);
                if !keep_on_miss {
                    ctx.sessions.clear(&ctx.key).await;
                }
                return error_reply(&e, city);
            }
        };

        match candidates.len() {
            0 => {
                if !keep_on_miss {
                    ctx.sessions.clear(&ctx.key).await;
                }
                not_found(city)
            }
            1 => {
                ctx.sessions.clear(&ctx.key).await;
                self.report(ctx, &candidates[0]).await
            }
            _ => {
                let flow = WeatherFlow {
                    search_term: city.to_string(),
                    candidates,
                };
                let reply = selection_prompt(
                    &flow,
                    &format!("🌍 Several places match '{}'. Pick one:", city),
                );
                ctx.sessions
                    .set(&ctx.key, COMMAND, STEP_AWAIT_CHOICE, FlowData::Weather(flow))
                    .await;
                reply
            }
        }
    }

    async fn choose(
        &self,
        ctx: &CommandContext<'_>,
        session: &Session,
    ) -> Result<Reply, CommandError> {
        let FlowData::Weather(flow) = &session.data else {
            return Err(CommandError::SessionMismatch {
                expected: format!("{} candidates", COMMAND),
                found: format!("{} without candidates", session.command),
            });
        };

        let picked = ctx
            .argument()
            .and_then(|choice| choice.trim().parse::<usize>().ok())
            .filter(|n| (1..=flow.candidates.len()).contains(n))
            .map(|n| &flow.candidates[n - 1]);

        match picked {
            Some(place) => {
                ctx.sessions.clear(&ctx.key).await;
                Ok(self.report(ctx, place).await)
            }
            None => Ok(selection_prompt(
                flow,
                &format!(
                    "❌ That is not one of the options. Pick a number from 1 to {}:",
                    flow.candidates.len()
                ),
            )),
        }
    }

    async fn resume(
        &self,
        ctx: &CommandContext<'_>,
        session: &Session,
    ) -> Result<Reply, CommandError> {
        if ctx
            .argument()
            .is_some_and(|text| text.eq_ignore_ascii_case("cancel"))
        {
            ctx.sessions.clear(&ctx.key).await;
            return Ok(Reply::text("❌ Weather lookup cancelled."));
        }

        match session.step {
            STEP_AWAIT_CITY => Ok(match ctx.argument() {
                Some(city) => self.lookup(ctx, city, true).await,
                None => Reply::text(CITY_PROMPT),
            }),
            STEP_AWAIT_CHOICE => self.choose(ctx, session).await,
            step => Err(CommandError::UnexpectedStep {
                command: COMMAND.to_string(),
                step,
            }),
        }
    }
}

#[async_trait]
impl Command for WeatherCommand {
    fn name(&self) -> &str {
        COMMAND
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn usage(&self) -> Option<&str> {
        Some(USAGE)
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        match ctx.invocation {
            Invocation::Start => match ctx.argument() {
                Some(city) => Ok(self.lookup(ctx, city, false).await),
                None => {
                    ctx.sessions
                        .set(&ctx.key, COMMAND, STEP_AWAIT_CITY, FlowData::Empty)
                        .await;
                    Ok(Reply::text(CITY_PROMPT))
                }
            },
            Invocation::Continue => {
                let Some(session) = &ctx.session else {
                    return Err(CommandError::SessionMismatch {
                        expected: COMMAND.to_string(),
                        found: "no session".to_string(),
                    });
                };
                if session.command != COMMAND {
                    return Err(CommandError::SessionMismatch {
                        expected: COMMAND.to_string(),
                        found: session.command.clone(),
                    });
                }
                self.resume(ctx, session).await
            }
            // A button from a flow that has since expired or moved on.
            Invocation::Select => match &ctx.session {
                Some(session)
                    if session.command == COMMAND && session.step == STEP_AWAIT_CHOICE =>
                {
                    self.choose(ctx, session).await
                }
                _ => Ok(Reply::None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{place, Fixture};

    async fn run(fx: &Fixture, invocation: Invocation, argument: Option<&str>) -> Reply {
        WeatherCommand
            .execute(&fx.ctx(invocation, argument).await)
            .await
            .expect("weather")
    }

    fn three_places() -> Vec<GeoCandidate> {
        vec![place("Seoul", "KR"), place("Seoul", "US"), place("Seoul", "JP")]
    }

    #[test]
    fn flags_from_country_codes() {
        assert_eq!(country_flag("KR"), "🇰🇷");
        assert_eq!(country_flag("us"), "🇺🇸");
        assert_eq!(country_flag(""), "🌍");
        assert_eq!(country_flag("KOR"), "🌍");
    }

    #[test]
    fn report_lists_every_field() {
        let conditions = Conditions {
            main: "Rain".to_string(),
            description: "light rain".to_string(),
            temp: 12.6,
            feels_like: 11.2,
            humidity: 87,
        };
        let text = format_report(&place("Seoul", "KR"), &conditions, "metric");
        assert!(text.starts_with("🌧️ Weather in Seoul 🇰🇷"));
        assert!(text.contains("🌡️ Temperature: 13°C"));
        assert!(text.contains("🤗 Feels like: 11°C"));
        assert!(text.contains("💧 Humidity: 87%"));
        assert!(text.contains("☁️ Conditions: light rain"));
        assert!(text.contains("📍 Location: 37.5665, 126.9780"));
    }

    #[tokio::test]
    async fn unknown_city_creates_no_session() {
        let fx = Fixture::new();
        let reply = run(&fx, Invocation::Start, Some("InvalidCityXYZ")).await;
        assert!(reply
            .body()
            .expect("text")
            .contains("Could not find a city named 'InvalidCityXYZ'"));
        assert!(fx.sessions.get(&fx.key()).await.is_none());
    }

    #[tokio::test]
    async fn bare_command_waits_for_city() {
        let fx = Fixture::new();
        let reply = run(&fx, Invocation::Start, None).await;
        assert_eq!(reply, Reply::text(CITY_PROMPT));

        let session = fx.sessions.get(&fx.key()).await.expect("session");
        assert_eq!(session.command, "/weather");
        assert_eq!(session.step, 1);
    }

    #[tokio::test]
    async fn miss_during_step_one_keeps_flow() {
        let fx = Fixture::new();
        run(&fx, Invocation::Start, None).await;

        let reply = run(&fx, Invocation::Continue, Some("Atlantis")).await;
        assert!(reply.body().expect("text").contains("'Atlantis'"));
        assert_eq!(fx.sessions.get(&fx.key()).await.map(|s| s.step), Some(1));

        fx.weather.fail_with(|| WeatherError::Timeout);
        let reply = run(&fx, Invocation::Continue, Some("Seoul")).await;
        assert!(reply.body().expect("text").contains("try again later"));
        assert_eq!(fx.sessions.get(&fx.key()).await.map(|s| s.step), Some(1));
    }

    #[tokio::test]
    async fn ambiguous_city_offers_buttons() {
        let fx = Fixture::new();
        fx.weather.knows("Seoul", three_places());

        let reply = run(&fx, Invocation::Start, Some("Seoul")).await;
        let Reply::Keyboard { text, keyboard } = reply else {
            panic!("expected keyboard reply");
        };
        assert!(text.contains("1. Seoul 🇰🇷"));
        assert_eq!(keyboard.len(), 3);
        assert_eq!(keyboard[2][0].callback_data, "weather_select_3");

        let session = fx.sessions.get(&fx.key()).await.expect("session");
        assert_eq!(session.step, 2);
        assert!(matches!(&session.data, FlowData::Weather(flow) if flow.candidates.len() == 3));
    }

    #[tokio::test]
    async fn typed_choice_completes_flow() {
        let fx = Fixture::new();
        fx.weather.knows("Seoul", three_places());
        run(&fx, Invocation::Start, Some("Seoul")).await;

        let reply = run(&fx, Invocation::Continue, Some("2")).await;
        assert!(reply.body().expect("text").starts_with("☀️ Weather in Seoul 🇺🇸"));
        assert!(fx.sessions.get(&fx.key()).await.is_none());
    }

    #[tokio::test]
    async fn bad_choice_keeps_candidates() {
        let fx = Fixture::new();
        fx.weather.knows("Seoul", three_places());
        run(&fx, Invocation::Start, Some("Seoul")).await;
        let before = fx.sessions.get(&fx.key()).await.expect("session");

        for choice in ["5", "0", "two"] {
            let reply = run(&fx, Invocation::Continue, Some(choice)).await;
            assert!(reply.body().expect("text").contains("not one of the options"));
        }

        let after = fx.sessions.get(&fx.key()).await.expect("session");
        assert_eq!(after.step, 2);
        assert_eq!(after.data, before.data);
    }

    #[tokio::test]
    async fn expired_button_yields_no_reply() {
        let fx = Fixture::new();
        let reply = run(&fx, Invocation::Select, Some("1")).await;
        assert_eq!(reply, Reply::None);
    }

    #[tokio::test]
    async fn typed_cancel_ends_flow() {
        let fx = Fixture::new();
        run(&fx, Invocation::Start, None).await;
        let reply = run(&fx, Invocation::Continue, Some("Cancel")).await;
        assert_eq!(reply, Reply::text("❌ Weather lookup cancelled."));
        assert!(fx.sessions.get(&fx.key()).await.is_none());
    }

    #[tokio::test]
    async fn foreign_session_is_a_mismatch() {
        let fx = Fixture::new();
        fx.sessions.set(&fx.key(), "/other", 1, FlowData::Empty).await;
        let err = WeatherCommand
            .execute(&fx.ctx(Invocation::Continue, Some("Seoul")).await)
            .await
            .expect_err("mismatch");
        assert!(matches!(err, CommandError::SessionMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_api_key_is_reported() {
        let fx = Fixture::new();
        fx.weather.fail_with(|| WeatherError::NotConfigured);
        let reply = run(&fx, Invocation::Start, Some("Seoul")).await;
        assert!(reply.body().expect("text").contains("not configured"));
    }
}
