//! Call primitive shared by the manager and the source.
//!
//! Every protocol call funnels through [`Link::call`], which serializes
//! the application identity, maps the return code and resolves FAILURE
//! results to a condition code via `DAT_STATUS`.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::traits::Dsm;
use crate::error::{Result, TwainError};
use crate::protocol::{
    condition_text, Completion, Identity, ReturnCode, Status, DAT_STATUS, DG_CONTROL, MSG_GET,
    TWRC_FAILURE,
};

pub struct Link {
    dsm: Arc<dyn Dsm>,
    app: Mutex<Identity>,
}

impl Link {
    pub fn new(dsm: Arc<dyn Dsm>, app: Identity) -> Self {
        Self {
            dsm,
            app: Mutex::new(app),
        }
    }

    pub fn dsm(&self) -> &Arc<dyn Dsm> {
        &self.dsm
    }

    /// Application identity, including the id the DSM assigned on open.
    pub fn app_identity(&self) -> Identity {
        self.app.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Issue one call and return the raw code.
    pub fn entry(
        &self,
        dest: Option<&Identity>,
        dg: u32,
        dat: u16,
        msg: u16,
        data: &mut [u8],
    ) -> ReturnCode {
        let mut app = self.app.lock().unwrap_or_else(PoisonError::into_inner);
        let mut origin = app.to_bytes();
        let dest_bytes = dest.map(Identity::to_bytes);
        let rc = ReturnCode(self.dsm.entry(
            &mut origin,
            dest_bytes.as_deref(),
            dg,
            dat,
            msg,
            data,
        ));
        if let Ok(updated) = Identity::from_bytes(&origin) {
            *app = updated;
        }
        debug!(
            dg = %format!("{:#x}", dg),
            dat = %format!("{:#06x}", dat),
            msg = %format!("{:#06x}", msg),
            rc = %rc,
            dest = dest.map(|d| d.id),
            "DSM_Entry"
        );
        rc
    }

    /// Issue one call and map the return code to a [`Completion`].
    pub fn call(
        &self,
        dest: Option<&Identity>,
        dg: u32,
        dat: u16,
        msg: u16,
        data: &mut [u8],
    ) -> Result<Completion> {
        let rc = self.entry(dest, dg, dat, msg, data);
        match rc.classify() {
            Some(result) => result,
            None => {
                let condition = self.condition_code(dest);
                let message = match condition {
                    Some(code) => condition_text(code),
                    None => format!("Failed to call data source. RC = {}", TWRC_FAILURE),
                };
                Err(TwainError::Protocol {
                    code: TWRC_FAILURE,
                    condition,
                    message,
                })
            }
        }
    }

    /// Condition code of the last failed call against `dest`.
    pub fn condition_code(&self, dest: Option<&Identity>) -> Option<u16> {
        let mut buf = vec![0u8; Status::SIZE];
        let rc = self.entry(dest, DG_CONTROL, DAT_STATUS, MSG_GET, &mut buf);
        if rc.classify().is_some_and(|r| r.is_ok()) {
            Status::from_bytes(&buf).ok().map(|s| s.condition_code)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::MockDsm;
    use crate::protocol::*;

    fn link() -> (Arc<MockDsm>, Link) {
        let mock = Arc::new(MockDsm::new());
        let link = Link::new(mock.clone(), Identity::default());
        (mock, link)
    }

    #[test]
    fn test_open_updates_app_identity() {
        let (_, link) = link();
        let mut parent = HandleRecord(0).to_bytes();
        link.call(None, DG_CONTROL, DAT_PARENT, MSG_OPENDSM, &mut parent)
            .unwrap();
        assert_eq!(link.app_identity().id, 1);
    }

    #[test]
    fn test_failure_resolves_condition() {
        let (mock, link) = link();
        let mut buf = vec![0u8; Identity::SIZE];
        let err = link
            .call(None, DG_CONTROL, DAT_IDENTITY, MSG_GETFIRST, &mut buf)
            .unwrap_err();
        assert_eq!(err.condition(), Some(TWCC_NODS));
        assert_eq!(mock.count_calls(DAT_STATUS, MSG_GET), 1);
    }

    #[test]
    fn test_unknown_code_is_protocol_error() {
        let (mock, link) = link();
        mock.script(DAT_PARENT, MSG_OPENDSM, 77);
        let mut parent = HandleRecord(0).to_bytes();
        let err = link
            .call(None, DG_CONTROL, DAT_PARENT, MSG_OPENDSM, &mut parent)
            .unwrap_err();
        assert!(matches!(err, TwainError::Protocol { code: 77, .. }));
    }
}
