//! Producer-side contract for row data sources.

use crate::control::ImportControl;
use crate::identifier::ColumnIdentifier;
use crate::receiver::DataReceiver;
use crate::Result;

/// A source that parses one input (or, in directory mode, a sequence of
/// inputs) and drives a [`DataReceiver`] through the callback contract.
///
/// Producers poll their [`ImportControl`] between rows and files. On
/// completion they always notify the receiver: `import_cancelled` when
/// the control token was cancelled, `import_finished` otherwise
/// (a requested stop counts as a normal finish).
#[allow(async_fn_in_trait)]
pub trait RowDataProducer {
    /// Parse the source and push every row to the receiver.
    async fn start<R: DataReceiver>(&mut self, receiver: &mut R) -> Result<()>;

    /// The columns present in the source (header or first row), without
    /// consuming rows of a later `start` call.
    async fn source_columns(&mut self) -> Result<Vec<ColumnIdentifier>>;

    /// The shared control token.
    fn control(&self) -> ImportControl;

    /// Abort the run. Reported to the receiver as a cancellation.
    fn cancel(&self) {
        self.control().cancel();
    }

    /// Terminate early without error. Reported as a normal finish.
    fn stop(&self) {
        self.control().request_stop();
    }
}
