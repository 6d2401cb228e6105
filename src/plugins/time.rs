//! 时间相关能力

use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde_json::json;

use super::{CapabilityArgs, CapabilityError, CapabilityResult, Handler, Provider, RegistryBuilder, RegistryError};

pub const PROVIDER: Provider = Provider {
    name: "time",
    register,
};

fn register(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
    b.register(
        "get_current_time",
        "Current local time, optionally formatted with a strftime pattern",
        Handler::Plain(get_current_time),
    )?;
    b.register("get_current_date", "Current local date (YYYY-MM-DD)", Handler::Plain(get_current_date))?;
    b.register("get_day_of_week", "Current weekday name", Handler::Plain(get_day_of_week))?;
    b.register(
        "get_time_of_day",
        "morning / afternoon / evening / night",
        Handler::Plain(get_time_of_day),
    )?;
    b.register(
        "days_until",
        "Days from today until a YYYY-MM-DD date (negative if past)",
        Handler::Plain(days_until),
    )
}

fn get_current_time(args: &CapabilityArgs) -> CapabilityResult {
    let fmt = args.opt_str(0, "fmt")?.unwrap_or("%Y-%m-%d %H:%M:%S");
    let now = Local::now();
    // chrono 对非法格式串在 Display 时报错，这里先校验
    let items: Vec<_> = chrono::format::StrftimeItems::new(fmt).collect();
    if items.iter().any(|i| matches!(i, chrono::format::Item::Error)) {
        return Err(CapabilityError::InvalidArgument(format!("invalid time format: {fmt}")));
    }
    Ok(json!(now.format_with_items(items.into_iter()).to_string()))
}

fn get_current_date(_args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(Local::now().format("%Y-%m-%d").to_string()))
}

fn get_day_of_week(_args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(Local::now().format("%A").to_string()))
}

fn get_time_of_day(_args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(time_of_day(Local::now().hour())))
}

pub(crate) fn time_of_day(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    }
}

fn days_until(args: &CapabilityArgs) -> CapabilityResult {
    let raw = args.str(0, "date")?;
    let target = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| CapabilityError::InvalidArgument(format!("invalid date '{raw}': {e}")))?;
    Ok(json!(days_between(Local::now().date_naive(), target)))
}

fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    i64::from(to.num_days_from_ce()) - i64::from(from.num_days_from_ce())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(time_of_day(6), "morning");
        assert_eq!(time_of_day(13), "afternoon");
        assert_eq!(time_of_day(19), "evening");
        assert_eq!(time_of_day(23), "night");
        assert_eq!(time_of_day(2), "night");
    }

    #[test]
    fn test_days_between() {
        let a = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(days_between(a, b), 4);
        assert_eq!(days_between(b, a), -4);
    }

    #[test]
    fn test_days_until_rejects_bad_date() {
        let args = CapabilityArgs::positional(vec![json!("next tuesday")]);
        assert!(matches!(days_until(&args), Err(CapabilityError::InvalidArgument(_))));
    }

    #[test]
    fn test_current_time_format() {
        let args = CapabilityArgs::positional(vec![json!("%Y")]);
        let year = get_current_time(&args).unwrap();
        assert_eq!(year.as_str().unwrap().len(), 4);
    }
}
