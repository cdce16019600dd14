//! Server-to-server transfer (FXP).
//!
//! One server is put into passive mode and the other is pointed at it with
//! `PORT`; the payload never passes through this client. Failures are
//! reported on the session where they happened.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{format_command, ControlChannel};
use crate::ftp::transfer::{format_port_command, request_pasv};
use crate::ftp::types::{FxpMethod, TransferMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Destination,
}

struct FxpFailure {
    side: Side,
    error: FtpError,
}

trait OnSide<T> {
    fn on(self, side: Side) -> Result<T, FxpFailure>;
}

impl<T> OnSide<T> for FtpResult<T> {
    fn on(self, side: Side) -> Result<T, FxpFailure> {
        self.map_err(|error| FxpFailure { side, error })
    }
}

/// How a transfer attempt ended when no step failed outright.
enum Outcome {
    /// Both final replies were read; `true` if both were class 2.
    Finished(bool),
    /// The second transfer command was refused and the cleanup ran.
    Refused(Side, FtpError),
}

impl FtpClient {
    /// Copy `src_path` on `src` to `dst_path` on `dst`.
    ///
    /// Returns `Ok(true)` when both servers report success, `Ok(false)` when
    /// the second transfer command was refused (the listening side gets a
    /// fresh `PASV` and the other side's class-4 abort reply is drained) or
    /// a final reply was not class 2.
    pub async fn fxp(
        src: &mut FtpClient,
        dst: &mut FtpClient,
        src_path: &str,
        dst_path: &str,
        mode: TransferMode,
        method: FxpMethod,
    ) -> FtpResult<bool> {
        let res = run(
            &mut src.control,
            &mut dst.control,
            src_path,
            dst_path,
            mode,
            method,
        )
        .await;
        match res {
            Ok(Outcome::Finished(ok)) => {
                if !ok {
                    log::warn!(
                        "FXP finished with failure: source '{}', destination '{}'",
                        src.last_response(),
                        dst.last_response()
                    );
                }
                Ok(ok)
            }
            Ok(Outcome::Refused(side, error)) => {
                side_of(src, dst, side).control.report(&error);
                Ok(false)
            }
            Err(FxpFailure { side, error }) => {
                side_of(src, dst, side).control.report(&error);
                Err(error)
            }
        }
    }
}

fn side_of<'a>(src: &'a mut FtpClient, dst: &'a mut FtpClient, side: Side) -> &'a mut FtpClient {
    match side {
        Side::Source => src,
        Side::Destination => dst,
    }
}

async fn run(
    src: &mut ControlChannel,
    dst: &mut ControlChannel,
    src_path: &str,
    dst_path: &str,
    mode: TransferMode,
    method: FxpMethod,
) -> Result<Outcome, FxpFailure> {
    use Side::{Destination, Source};

    let retr = format_command("RETR", src_path).on(Source)?;
    let stor = format_command("STOR", dst_path).on(Destination)?;

    let type_cmd = format!("TYPE {}", mode.type_code());
    dst.expect(&type_cmd, '2').await.on(Destination)?;
    src.expect(&type_cmd, '2').await.on(Source)?;

    let (listen_side, connect_side) = match method {
        FxpMethod::Default => (Destination, Source),
        FxpMethod::Alternative => (Source, Destination),
    };
    let (listener, connector) = match method {
        FxpMethod::Default => (&mut *dst, &mut *src),
        FxpMethod::Alternative => (&mut *src, &mut *dst),
    };

    let addr = request_pasv(listener).await.on(listen_side)?;
    log::debug!("FXP: {:?} listens on {}", listen_side, addr);
    connector
        .expect(&format_port_command(addr), '2')
        .await
        .on(connect_side)?;

    // Default: RETR on the source first, then STOR on the destination.
    // Alternative: STOR on the destination first, then RETR on the source.
    let (first, first_side, second, second_side) = match method {
        FxpMethod::Default => (&retr, Source, &stor, Destination),
        FxpMethod::Alternative => (&stor, Destination, &retr, Source),
    };
    let (first_ctl, second_ctl) = match method {
        FxpMethod::Default => (&mut *src, &mut *dst),
        FxpMethod::Alternative => (&mut *dst, &mut *src),
    };

    first_ctl.expect(first, '1').await.on(first_side)?;

    if !second_ctl.send_command(second, '1').await.on(second_side)? {
        let refusal = FtpError::unexpected_reply('1', second_ctl.last_response());
        log::debug!("FXP: {:?} refused, resetting", second_side);
        // Re-PASV the listener; the other side then fails with class 4.
        second_ctl.send_command("PASV", '2').await.on(second_side)?;
        first_ctl.read_response('4').await.on(first_side)?;
        return Ok(Outcome::Refused(second_side, refusal));
    }

    let src_ok = src.read_response('2').await.on(Source)?;
    let dst_ok = dst.read_response('2').await.on(Destination)?;
    Ok(Outcome::Finished(src_ok && dst_ok))
}
