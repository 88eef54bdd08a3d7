//! One-shot fault injection for the simulated device.

use std::collections::HashMap;

use crate::error::VendorError;

/// Entry points of the simulated device that can be counted and faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorCall {
    CreateBlas,
    CreateSolver,
    Malloc,
    /// Any host/device or device/device copy.
    Memcpy,
    SetIdentity,
    GetrfBufferSize,
    Getrf,
    Getrs,
    GeqrfBufferSize,
    Geqrf,
    OrgqrBufferSize,
    Orgqr,
    OrgqrStridedBatched,
    GesvdBufferSize,
    Gesvd,
    GetrfBatched,
    GetriBatched,
    MatinvBatched,
    GeqrfBatched,
}

/// What an armed fault does to the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The entry point returns this non-success status without running.
    Status(i32),
    /// The entry point runs, then the info code of matrix `index` is
    /// overwritten with `code`.
    Info { index: usize, code: i32 },
}

#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    armed: HashMap<VendorCall, Fault>,
    calls: HashMap<VendorCall, usize>,
}

/// Info override to apply after a call has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InfoFault {
    pub index: usize,
    pub code: i32,
}

impl FaultPlan {
    pub(crate) fn arm(&mut self, call: VendorCall, fault: Fault) {
        self.armed.insert(call, fault);
    }

    pub(crate) fn clear(&mut self) {
        self.armed.clear();
    }

    pub(crate) fn calls(&self, call: VendorCall) -> usize {
        self.calls.get(&call).copied().unwrap_or(0)
    }

    /// Record a call and consume any fault armed for it.
    pub(crate) fn enter(&mut self, call: VendorCall) -> Result<Option<InfoFault>, VendorError> {
        *self.calls.entry(call).or_insert(0) += 1;
        match self.armed.remove(&call) {
            None => Ok(None),
            Some(Fault::Status(code)) => Err(VendorError(code)),
            Some(Fault::Info { index, code }) => Ok(Some(InfoFault { index, code })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_are_one_shot() {
        let mut plan = FaultPlan::default();
        plan.arm(VendorCall::Getrf, Fault::Status(6));
        assert_eq!(plan.enter(VendorCall::Geqrf), Ok(None));
        assert_eq!(plan.enter(VendorCall::Getrf), Err(VendorError(6)));
        assert_eq!(plan.enter(VendorCall::Getrf), Ok(None));
        assert_eq!(plan.calls(VendorCall::Getrf), 2);
        assert_eq!(plan.calls(VendorCall::Gesvd), 0);
    }

    #[test]
    fn test_info_fault() {
        let mut plan = FaultPlan::default();
        plan.arm(VendorCall::GetrfBatched, Fault::Info { index: 2, code: 3 });
        assert_eq!(
            plan.enter(VendorCall::GetrfBatched),
            Ok(Some(InfoFault { index: 2, code: 3 }))
        );

        plan.arm(VendorCall::Geqrf, Fault::Status(1));
        plan.clear();
        assert_eq!(plan.enter(VendorCall::Geqrf), Ok(None));
    }
}
