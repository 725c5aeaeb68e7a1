//! Argument validation for each command.

use super::args::{is_int, key_value, parse_float, parse_switch};
use super::{Command, CommandRegistry};
use crate::config::{MAX_FRAME_RATE, MAX_SAVE_COUNT, USER_TIMEOUT_MS};
use crate::error::{CommandError, CommandResult};
use crate::state::{DeviceState, ExposureSession};

pub(super) fn register_all(registry: &mut CommandRegistry) {
    for name in ["QUIT", "BYE", "EXIT", "LOGOUT"] {
        registry.register(name, |args, _| no_args(args, Command::Quit));
    }
    registry.register("SHUTDOWN", |args, _| no_args(args, Command::Shutdown));
    registry.register("STARTEXP", parse_startexp);
    registry.register("ENDEXP", |args, _| no_args(args, Command::EndExp));
    registry.register("FRAMERATE", parse_frame_rate);
    registry.register("EXPTIME", parse_exposure);
    registry.register("TEC", parse_tec);
    registry.register("TEMP", |args, _| no_args(args, Command::Temp));
    registry.register("ROI", parse_roi);
    registry.register("NULL", parse_null);
    registry.register("VIDEO", |args, _| {
        single_switch(args, "Invalid video mode").map(Command::Video)
    });
    registry.register("GUIDE", |args, _| {
        single_switch(args, "Invalid guide command. Should be <ON|OFF>").map(Command::Guide)
    });
    registry.register("ISU", |args, _| {
        single_switch(args, "Invalid isu mode").map(Command::Isu)
    });
    registry.register("SAVE", parse_save);
}

fn no_args(args: &[String], command: Command) -> CommandResult<Command> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(CommandError::Syntax)
    }
}

fn single_switch(args: &[String], usage: &'static str) -> CommandResult<bool> {
    match args {
        [arg] => parse_switch(arg).ok_or(CommandError::Usage(usage)),
        _ => Err(CommandError::Usage(usage)),
    }
}

/// Zero arguments for a query, one finite float for a set.
fn query_or_float(args: &[String], command: &'static str) -> CommandResult<Option<f64>> {
    match args {
        [] => Ok(None),
        [arg] => parse_float(arg)
            .map(Some)
            .ok_or_else(|| CommandError::failed(command, "Invalid Argument Specified")),
        _ => Err(CommandError::failed(command, "Invalid Argument Specified")),
    }
}

fn parse_frame_rate(args: &[String], _: &DeviceState) -> CommandResult<Command> {
    let rate = query_or_float(args, "FRAMERATE")?;
    if let Some(hz) = rate {
        let too_slow = 1e3 / hz > USER_TIMEOUT_MS;
        if hz <= 0.0 || hz > MAX_FRAME_RATE || too_slow {
            return Err(CommandError::failed(
                "FRAMERATE",
                "Frame Rate Specified is Invalid",
            ));
        }
    }
    Ok(Command::FrameRate(rate))
}

fn parse_exposure(args: &[String], _: &DeviceState) -> CommandResult<Command> {
    let ms = query_or_float(args, "EXPTIME")?;
    if ms.is_some_and(|ms| ms <= 0.0) {
        return Err(CommandError::failed("EXPTIME", "Invalid Argument Specified"));
    }
    Ok(Command::ExpTime(ms))
}

fn parse_tec(args: &[String], _: &DeviceState) -> CommandResult<Command> {
    query_or_float(args, "TEC").map(Command::Tec)
}

fn parse_roi(args: &[String], state: &DeviceState) -> CommandResult<Command> {
    const USAGE: &str = "Invalid ROI command. Should be ROI <X0 Y0>";
    match args {
        [] => Ok(Command::Roi(None)),
        [x, y] if is_int(x) && is_int(y) => {
            let (Ok(x0), Ok(y0)) = (x.parse::<i64>(), y.parse::<i64>()) else {
                return Err(CommandError::Usage(
                    "Invalid ROI command. Argument is not a valid integer",
                ));
            };
            if !state.guide_origin_in_range(x0, y0) {
                return Err(CommandError::Usage(
                    "Invalid ROI command. Arguments are out of range",
                ));
            }
            Ok(Command::Roi(Some((x0 as usize, y0 as usize))))
        }
        _ => Err(CommandError::Usage(USAGE)),
    }
}

fn parse_null(args: &[String], state: &DeviceState) -> CommandResult<Command> {
    match args {
        [] => Ok(Command::Null(None)),
        [x, y] => {
            let (Some(x), Some(y)) = (parse_float(x), parse_float(y)) else {
                return Err(CommandError::Usage(
                    "Invalid NULL command. Should be NULL <NULLX> <NULLY>",
                ));
            };
            if !state.null_in_range(x, y) {
                return Err(CommandError::failed("NULL", "NULL position out of range"));
            }
            Ok(Command::Null(Some((x, y))))
        }
        _ => Err(CommandError::Usage(
            "Invalid NULL command. Should be NULL <NULLX> <NULLY>",
        )),
    }
}

fn parse_save(args: &[String], _: &DeviceState) -> CommandResult<Command> {
    let invalid = || CommandError::failed("SAVE", "Invalid Argument Specified");
    let (count, comment) = match args {
        [count] => (count, String::new()),
        [count, comment] => (count, comment.clone()),
        _ => return Err(CommandError::Syntax),
    };
    if !is_int(count) {
        return Err(invalid());
    }
    let count = count
        .parse::<i64>()
        .ok()
        .filter(|c| (0..=MAX_SAVE_COUNT).contains(c))
        .ok_or_else(invalid)?;
    Ok(Command::Save {
        count: count as u32,
        comment,
    })
}

fn parse_startexp(args: &[String], _: &DeviceState) -> CommandResult<Command> {
    let mandatory = || CommandError::failed("STARTEXP", "Filename argument is mandatory");
    let mut session = ExposureSession::default();
    let mut filename = None;

    for arg in args {
        if let Some(value) = key_value(arg, "filename") {
            filename = Some(value.to_string());
        } else if let Some(value) = key_value(arg, "ra") {
            session.ra = Some(value.to_string());
        } else if let Some(value) = key_value(arg, "dec") {
            session.dec = Some(value.to_string());
        } else if let Some(value) = key_value(arg, "equinox") {
            session.equinox = Some(parse_float(value).ok_or_else(|| {
                CommandError::failed("STARTEXP", "float equinox argument expected")
            })?);
        } else if let Some(value) = key_value(arg, "objmag") {
            session.objmag = Some(parse_float(value).ok_or_else(|| {
                CommandError::failed("STARTEXP", "float objmag argument expected")
            })?);
        } else {
            return Err(CommandError::failed(
                "STARTEXP",
                format!("{arg} argument is unsupported"),
            ));
        }
    }

    session.filename = filename.filter(|f| !f.is_empty()).ok_or_else(mandatory)?;
    Ok(Command::StartExp(session))
}
