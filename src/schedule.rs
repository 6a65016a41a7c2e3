use chrono::{DateTime, Datelike, Local, NaiveTime};
use serde::Deserialize;

use crate::{error::ConfigError, model::OFF_VALUE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleValue {
  Temperature(f64),
  Off,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleMatch {
  pub value: ScheduleValue,
  pub rule: String,
}

/// Maps a room and a point in time to the scheduled value. Implementations
/// must be pure queries.
pub trait Schedule: Send + Sync {
  fn evaluate(&self, room: &str, time: &DateTime<Local>) -> Option<ScheduleMatch>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
  pub name: String,
  pub value: ScheduleValue,
  pub start: Option<NaiveTime>,
  pub end: Option<NaiveTime>,
  /// ISO weekdays, 1 = Monday.
  pub weekdays: Option<Vec<u32>>,
}

impl Rule {
  fn matches(&self, time: &DateTime<Local>) -> bool {
    if let Some(weekdays) = &self.weekdays {
      if !weekdays.contains(&time.weekday().number_from_monday()) {
        return false;
      }
    }
    let t = time.time();
    match (self.start, self.end) {
      (None, None) => true,
      (Some(start), None) => t >= start,
      (None, Some(end)) => t < end,
      (Some(start), Some(end)) if start < end => t >= start && t < end,
      // window wraps past midnight
      (Some(start), Some(end)) => t >= start || t < end,
    }
  }
}

/// Rule as written in the configuration file.
#[derive(Deserialize, Debug, Clone)]
pub struct RuleConfig {
  pub name: Option<String>,
  pub value: RawValue,
  pub start: Option<String>,
  pub end: Option<String>,
  pub weekdays: Option<Vec<u32>>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawValue {
  Number(f64),
  Text(String),
}

fn parse_time(rule: &Option<String>, text: &Option<String>) -> Result<Option<NaiveTime>, ConfigError> {
  match text {
    None => Ok(None),
    Some(text) => NaiveTime::parse_from_str(text, "%H:%M")
      .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
      .map(Some)
      .map_err(|_| ConfigError::InvalidRule {
        rule: rule.clone(),
        reason: format!("bad time {:?}, expected HH:MM[:SS]", text),
      }),
  }
}

impl TryFrom<RuleConfig> for Rule {
  type Error = ConfigError;

  fn try_from(config: RuleConfig) -> Result<Self, Self::Error> {
    let value = match &config.value {
      RawValue::Number(value) => ScheduleValue::Temperature(*value),
      RawValue::Text(text) if text.eq_ignore_ascii_case(OFF_VALUE) => ScheduleValue::Off,
      RawValue::Text(text) => {
        return Err(ConfigError::InvalidRule {
          rule: config.name.clone(),
          reason: format!("value {:?} is neither a temperature nor {}", text, OFF_VALUE),
        })
      }
    };
    if let Some(weekdays) = &config.weekdays {
      if let Some(day) = weekdays.iter().find(|day| !(1..=7).contains(*day)) {
        return Err(ConfigError::InvalidRule {
          rule: config.name.clone(),
          reason: format!("weekday {} outside 1..=7", day),
        });
      }
    }
    let start = parse_time(&config.name, &config.start)?;
    let end = parse_time(&config.name, &config.end)?;
    Ok(Rule {
      name: config.name.unwrap_or_else(|| "unnamed".to_string()),
      value,
      start,
      end,
      weekdays: config.weekdays,
    })
  }
}

/// Ordered rule list, the first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySchedule {
  rules: Vec<Rule>,
}

impl WeeklySchedule {
  pub fn new(rules: Vec<Rule>) -> Self {
    WeeklySchedule { rules }
  }

  pub fn rules(&self) -> &[Rule] {
    &self.rules
  }

  /// Used for rooms without any configured rule.
  pub fn default_week() -> Self {
    let at = |h, m| NaiveTime::from_hms_opt(h, m, 0);
    let rule = |name: &str, value, start, end, weekdays: &[u32]| Rule {
      name: name.to_string(),
      value: ScheduleValue::Temperature(value),
      start,
      end,
      weekdays: Some(weekdays.to_vec()),
    };
    let weekdays = [1, 2, 3, 4, 5];
    let weekend = [6, 7];
    WeeklySchedule::new(vec![
      rule("wd morning", 20.0, at(6, 0), at(8, 30), &weekdays),
      rule("wd day", 16.0, at(8, 30), at(16, 30), &weekdays),
      rule("wd evening", 21.0, at(16, 30), at(22, 30), &weekdays),
      rule("we morning", 20.0, at(7, 0), at(9, 0), &weekend),
      rule("we day", 18.0, at(9, 0), at(16, 0), &weekend),
      rule("we evening", 21.0, at(16, 0), at(23, 0), &weekend),
      Rule { name: "sleep".to_string(), value: ScheduleValue::Off, start: None, end: None, weekdays: None },
    ])
  }
}

impl Schedule for WeeklySchedule {
  fn evaluate(&self, room: &str, time: &DateTime<Local>) -> Option<ScheduleMatch> {
    let rule = self.rules.iter().find(|rule| rule.matches(time))?;
    log::debug!("room {} matched rule {} at {}", room, rule.name, time);
    Some(ScheduleMatch { value: rule.value, rule: rule.name.clone() })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  // 2024-01-01 was a Monday
  fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
  }

  fn value_at(schedule: &WeeklySchedule, time: DateTime<Local>) -> Option<ScheduleValue> {
    schedule.evaluate("test", &time).map(|m| m.value)
  }

  #[test]
  fn default_week() {
    let schedule = WeeklySchedule::default_week();
    assert_eq!(value_at(&schedule, at(1, 7, 0)), Some(ScheduleValue::Temperature(20.0)));
    assert_eq!(value_at(&schedule, at(1, 8, 30)), Some(ScheduleValue::Temperature(16.0)));
    assert_eq!(value_at(&schedule, at(1, 22, 30)), Some(ScheduleValue::Off));
    assert_eq!(value_at(&schedule, at(6, 8, 0)), Some(ScheduleValue::Temperature(20.0)));
    assert_eq!(value_at(&schedule, at(7, 12, 0)), Some(ScheduleValue::Temperature(18.0)));
    assert_eq!(value_at(&schedule, at(7, 3, 0)), Some(ScheduleValue::Off));
  }

  #[test]
  fn no_rule_no_match() {
    let schedule = WeeklySchedule::new(vec![Rule {
      name: "morning".to_string(),
      value: ScheduleValue::Temperature(19.0),
      start: NaiveTime::from_hms_opt(6, 0, 0),
      end: NaiveTime::from_hms_opt(9, 0, 0),
      weekdays: None,
    }]);
    assert_eq!(value_at(&schedule, at(2, 10, 0)), None);
    assert_eq!(schedule.evaluate("test", &at(2, 6, 0)).unwrap().rule, "morning");
  }

  #[test]
  fn window_wrapping_midnight() {
    let schedule = WeeklySchedule::new(vec![Rule {
      name: "night".to_string(),
      value: ScheduleValue::Temperature(17.0),
      start: NaiveTime::from_hms_opt(22, 0, 0),
      end: NaiveTime::from_hms_opt(6, 0, 0),
      weekdays: None,
    }]);
    assert!(value_at(&schedule, at(3, 23, 0)).is_some());
    assert!(value_at(&schedule, at(3, 5, 59)).is_some());
    assert!(value_at(&schedule, at(3, 12, 0)).is_none());
  }

  #[test]
  fn rule_from_config() {
    let config: RuleConfig =
      serde_yaml::from_str("{name: evening, value: 21.5, start: '17:00', end: '23:00', weekdays: [1, 2]}").unwrap();
    let rule = Rule::try_from(config).unwrap();
    assert_eq!(rule.value, ScheduleValue::Temperature(21.5));
    assert_eq!(rule.start, NaiveTime::from_hms_opt(17, 0, 0));

    let config: RuleConfig = serde_yaml::from_str("{value: 'OFF'}").unwrap();
    assert_eq!(Rule::try_from(config).unwrap().value, ScheduleValue::Off);
  }

  #[test]
  fn invalid_rules_are_rejected() {
    let bad_value: RuleConfig = serde_yaml::from_str("{value: warm}").unwrap();
    assert!(Rule::try_from(bad_value).is_err());
    let bad_day: RuleConfig = serde_yaml::from_str("{value: 20, weekdays: [0]}").unwrap();
    assert!(Rule::try_from(bad_day).is_err());
    let bad_time: RuleConfig = serde_yaml::from_str("{value: 20, start: '25:00'}").unwrap();
    assert!(Rule::try_from(bad_time).is_err());
  }
}
