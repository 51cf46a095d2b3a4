use crate::{error::RuntimeError, val::Val};

/// Reusable destination for call results, doubling as the carrier for
/// tail-call requests.
///
/// While a tail call is pending, `values` holds the requested arguments and
/// every value read fails with a contract violation.
#[derive(Debug, Default)]
pub struct ResultChannel {
    values: Vec<Val>,
    tail_target: Option<Val>,
}

impl ResultChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ResultChannel {
            values: Vec::with_capacity(capacity),
            tail_target: None,
        }
    }

    pub fn clear(&mut self) {
        self.tail_target = None;
        self.values.clear();
    }

    pub fn set<I: IntoIterator<Item = Val>>(&mut self, values: I) {
        self.clear();
        self.values.extend(values);
    }

    pub fn set_one(&mut self, value: Val) {
        self.clear();
        self.values.push(value);
    }

    pub fn set_from(&mut self, values: &[Val]) {
        self.clear();
        self.values.extend_from_slice(values);
    }

    /// Fails while a tail call is pending; the requested arguments are not results.
    pub fn append(&mut self, value: Val) -> Result<(), RuntimeError> {
        self.check_readable()?;
        self.values.push(value);
        Ok(())
    }

    pub fn prepend(&mut self, value: Val) -> Result<(), RuntimeError> {
        self.check_readable()?;
        self.values.insert(0, value);
        Ok(())
    }

    /// Value at `index`, nil past the end.
    pub fn get(&self, index: usize) -> Result<Val, RuntimeError> {
        self.check_readable()?;
        Ok(self.values.get(index).cloned().unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize, RuntimeError> {
        self.check_readable()?;
        Ok(self.values.len())
    }

    pub fn is_empty(&self) -> Result<bool, RuntimeError> {
        Ok(self.len()? == 0)
    }

    pub fn values(&self) -> Result<&[Val], RuntimeError> {
        self.check_readable()?;
        Ok(&self.values)
    }

    pub fn to_vec(&self) -> Result<Vec<Val>, RuntimeError> {
        Ok(self.values()?.to_vec())
    }

    /// Move the values out, leaving the channel empty.
    pub fn take(&mut self) -> Result<Vec<Val>, RuntimeError> {
        self.check_readable()?;
        Ok(std::mem::take(&mut self.values))
    }

    pub fn request_tail_call<I: IntoIterator<Item = Val>>(&mut self, target: Val, args: I) {
        self.values.clear();
        self.values.extend(args);
        self.tail_target = Some(target);
    }

    pub fn is_tail_call(&self) -> bool {
        self.tail_target.is_some()
    }

    /// Hand the pending target to the trampoline. The requested arguments
    /// stay readable through [`ResultChannel::tail_args`] until the next write.
    pub fn take_tail_call(&mut self) -> Option<Val> {
        self.tail_target.take()
    }

    pub fn tail_args(&self) -> &[Val] {
        &self.values
    }

    fn check_readable(&self) -> Result<(), RuntimeError> {
        if self.tail_target.is_some() {
            return Err(RuntimeError::contract("result channel used while a tail call is pending"));
        }
        Ok(())
    }
}
