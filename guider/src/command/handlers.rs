//! Execution of validated commands.

use std::sync::Arc;

use tracing::{info, warn};

use super::{Command, CommandContext, Reply};
use crate::error::{CommandError, CommandResult};

pub(super) fn execute(command: Command, ctx: &mut CommandContext<'_>) -> CommandResult<Reply> {
    match command {
        Command::Quit => Ok(Reply::Close),
        Command::Shutdown => {
            info!("shutdown requested");
            Ok(Reply::Shutdown)
        }
        Command::StartExp(session) => {
            info!("exposure session started: {}", session.filename);
            ctx.state.exposure = session;
            ctx.state.exposure_active = true;
            Ok(Reply::ok("STARTEXP"))
        }
        Command::EndExp => {
            ctx.state.exposure_active = false;
            Ok(Reply::ok("ENDEXP"))
        }
        Command::FrameRate(rate) => frame_rate(ctx, rate),
        Command::ExpTime(None) => {
            let ms = ctx.camera.exposure_ms().map_err(|e| {
                warn!("exposure read failed: {e}");
                CommandError::failed("EXPTIME", "Unable to read exposure time in the camera")
            })?;
            Ok(Reply::ok(format!("EXPTIME {ms:.9}")))
        }
        Command::ExpTime(Some(ms)) => {
            ctx.camera.set_exposure_ms(ms).map_err(|e| {
                warn!("exposure write failed: {e}");
                CommandError::failed("EXPTIME", "Unable to set exposure time in the camera")
            })?;
            ctx.state.exposure_ms = ms;
            Ok(Reply::ok(format!("EXPTIME {ms:5.2}")))
        }
        Command::Tec(None) => {
            let celsius = ctx.camera.tec_setpoint().map_err(|e| {
                warn!("TEC setpoint read failed: {e}");
                CommandError::failed("TEC", "Unable to read TEC set point in the camera")
            })?;
            Ok(Reply::ok(format!("TEC {celsius:4.1} degrees C")))
        }
        Command::Tec(Some(celsius)) => {
            ctx.camera.set_tec_setpoint(celsius).map_err(|e| {
                warn!("TEC setpoint write failed: {e}");
                CommandError::failed("TEC", "Unable to set TEC set point in the camera")
            })?;
            ctx.state.tec_setpoint = celsius;
            Ok(Reply::ok(format!("TEC {celsius:5.2}")))
        }
        Command::Temp => {
            let celsius = ctx.camera.sensor_temperature().map_err(|e| {
                warn!("temperature read failed: {e}");
                CommandError::failed("TEMP", "Unable to read temperature in the camera")
            })?;
            Ok(Reply::ok(format!("TEMP {celsius:4.1} degrees C")))
        }
        Command::Roi(None) => {
            let (x0, y0) = ctx.state.guide_origin();
            Ok(Reply::ok(format!("ROI {x0} {y0}")))
        }
        Command::Roi(Some((x0, y0))) => {
            if ctx.state.guide_on {
                let window = shared::Window::new(x0, y0, ctx.state.guide_window().size);
                ctx.grabber.set_roi(window).map_err(|e| {
                    warn!("ROI change rejected by grabber: {e}");
                    CommandError::failed("ROI", "set ROI failed")
                })?;
            }
            ctx.state.set_guide_origin(x0, y0);
            Ok(Reply::ok("ROI"))
        }
        Command::Null(None) => {
            let (x, y) = ctx.state.null_position();
            Ok(Reply::ok(format!("NULL {x:.6} {y:.6}")))
        }
        Command::Null(Some((x, y))) => {
            ctx.state.set_null_position(x, y);
            Ok(Reply::ok("NULL"))
        }
        Command::Video(on) => {
            ctx.state.video_on = on;
            Ok(Reply::ok(if on { "ON" } else { "OFF" }))
        }
        Command::Guide(true) => {
            ctx.grabber.set_roi(ctx.state.guide_window()).map_err(|e| {
                warn!("guide window rejected by grabber: {e}");
                CommandError::failed("GUIDE", "unable to set image ROI")
            })?;
            ctx.state.enter_guide_mode();
            Ok(Reply::ok("GUIDE ON"))
        }
        Command::Guide(false) => {
            ctx.grabber.clear_roi().map_err(|e| {
                warn!("grabber refused full frame: {e}");
                CommandError::failed("GUIDE", "unable to reset image ROI")
            })?;
            ctx.state.leave_guide_mode();
            Ok(Reply::ok("GUIDE OFF"))
        }
        Command::Isu(on) => isu(ctx, on),
        Command::Save { count, comment } => {
            ctx.state.save.arm(count, comment);
            Ok(Reply::ok("SAVE"))
        }
    }
}

fn frame_rate(ctx: &mut CommandContext<'_>, rate: Option<f64>) -> CommandResult<Reply> {
    ctx.camera.check_status_logged();
    if let Some(hz) = rate {
        ctx.camera.set_frame_rate(hz).map_err(|e| {
            warn!("frame rate write failed: {e}");
            CommandError::failed("FRAMERATE", "Unable to set frame rate in the camera")
        })?;
    }
    let hz = ctx.camera.frame_rate().map_err(|e| {
        warn!("frame rate read failed: {e}");
        CommandError::failed("FRAMERATE", "Unable to read frame rate in the camera")
    })?;
    ctx.state.frame_rate = hz;
    Ok(Reply::ok(format!("FRAMERATE {hz:5.2}")))
}

fn isu(ctx: &mut CommandContext<'_>, on: bool) -> CommandResult<Reply> {
    let Some(unit) = ctx.isu else {
        return Err(CommandError::failed("ISU", "No steering unit configured"));
    };

    if !on {
        ctx.homing.cancel();
        return match unit.stop() {
            Ok(()) => {
                ctx.state.isu_on = false;
                Ok(Reply::ok("OFF"))
            }
            Err(e) => {
                warn!("ISU stop failed: {e}");
                Err(CommandError::Bare("OFF"))
            }
        };
    }

    if ctx.homing.is_running() {
        ctx.homing.resume();
        return Ok(Reply::ok("ON"));
    }

    let homed = unit.is_homed().unwrap_or_else(|e| {
        warn!("ISU homing state unknown, assuming not homed: {e}");
        false
    });
    if !homed {
        ctx.homing.start(Arc::clone(unit));
        return Ok(Reply::ok("ON"));
    }

    match unit.enable() {
        Ok(()) => {
            ctx.state.isu_on = true;
            Ok(Reply::ok("ON"))
        }
        Err(e) => {
            warn!("ISU enable failed: {e}");
            ctx.state.isu_on = false;
            Err(CommandError::Bare("OFF"))
        }
    }
}
