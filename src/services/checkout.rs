//! Authorisation rules for `PUT /devices/:id`.
//!
//! The route is used two ways. With `?check` it is a checkout / checkin and
//! the body must carry `isCheckedout`; without it the body is a general edit
//! that only the owner may make and that must not touch the checkout flag.

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Device,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    CheckedIn,
    CheckedOut,
}

impl From<bool> for CheckoutState {
    fn from(is_checkedout: bool) -> Self {
        if is_checkedout {
            CheckoutState::CheckedOut
        } else {
            CheckoutState::CheckedIn
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Checkout,
    GeneralEdit,
}

/// What an authorised update is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CheckOut { by: Uuid },
    /// `holder` is the recorded borrower, `None` once their account is gone.
    CheckIn { holder: Option<Uuid> },
    Edit,
}

impl Transition {
    /// State the device must still be in when the write lands.
    pub fn expected_state(&self) -> Option<CheckoutState> {
        match self {
            Transition::CheckOut { .. } => Some(CheckoutState::CheckedIn),
            Transition::CheckIn { .. } => Some(CheckoutState::CheckedOut),
            Transition::Edit => None,
        }
    }
}

/// Only the owner may edit, delete or re-image a device.
pub fn can_modify(caller: Uuid, device: &Device) -> bool {
    device.user_id == caller
}

pub fn authorize_update(
    device: &Device,
    caller: Uuid,
    mode: UpdateMode,
    requested: Option<bool>,
) -> AppResult<Transition> {
    match mode {
        UpdateMode::Checkout => {
            let target = requested.ok_or_else(|| {
                AppError::BadRequest("provide check in / out details".to_string())
            })?;
            let current = CheckoutState::from(device.is_checkedout);

            match (current, CheckoutState::from(target)) {
                (CheckoutState::CheckedOut, CheckoutState::CheckedOut) => Err(AppError::Conflict(
                    "Already checked out by someone".to_string(),
                )),
                (CheckoutState::CheckedIn, CheckoutState::CheckedIn) => Err(AppError::Conflict(
                    "Already checked in by someone".to_string(),
                )),
                (CheckoutState::CheckedOut, CheckoutState::CheckedIn) => {
                    match device.last_checkedout_by {
                        Some(holder) if holder == caller => Ok(Transition::CheckIn {
                            holder: Some(caller),
                        }),
                        // borrower deleted; the owner takes the device back
                        None if can_modify(caller, device) => {
                            Ok(Transition::CheckIn { holder: None })
                        }
                        _ => Err(AppError::Unauthorized(
                            "Cannot check in as someone else has checked out this device"
                                .to_string(),
                        )),
                    }
                }
                // any authenticated user may take an available device
                (CheckoutState::CheckedIn, CheckoutState::CheckedOut) => {
                    Ok(Transition::CheckOut { by: caller })
                }
            }
        }
        UpdateMode::GeneralEdit => {
            if requested.is_some() {
                return Err(AppError::BadRequest(
                    "Cannot check in / out for this route".to_string(),
                ));
            }
            if !can_modify(caller, device) {
                return Err(AppError::Unauthorized(
                    "Current user is not authorized to update this Device".to_string(),
                ));
            }
            Ok(Transition::Edit)
        }
    }
}
