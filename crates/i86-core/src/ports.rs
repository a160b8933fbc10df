//! Port I/O seam for `IN`, `OUT`, `INS` and `OUTS`.

use crate::regs::Width;

pub trait PortIo: Send {
    fn read(&mut self, port: u16, width: Width) -> u32;
    fn write(&mut self, port: u16, width: Width, value: u32);
}

/// No devices attached: reads float high, writes are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPorts;

impl PortIo for NullPorts {
    fn read(&mut self, _port: u16, width: Width) -> u32 {
        width.mask()
    }

    fn write(&mut self, _port: u16, _width: Width, _value: u32) {}
}

impl<P: PortIo + ?Sized> PortIo for Box<P> {
    fn read(&mut self, port: u16, width: Width) -> u32 {
        (**self).read(port, width)
    }

    fn write(&mut self, port: u16, width: Width, value: u32) {
        (**self).write(port, width, value)
    }
}
