//! AF_PACKET socket implementation

use super::{Capture, RxInfo};
use crate::{Error, Result};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;

/// Raw link-layer socket bound to one interface.
///
/// Receive and send only need `&self`, so one socket can be shared by the
/// task reading from it and the tasks forwarding onto it.
pub struct AfPacketSocket {
    async_fd: AsyncFd<RawFd>,
    ifindex: i32,
}

impl AfPacketSocket {
    /// Open a socket on `ifname` and put the interface in promiscuous mode
    pub fn bind(ifname: &str) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };

        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let ifindex = match Self::get_ifindex(fd, ifname) {
            Ok(index) => index,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };

        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        let ret = if flags < 0 {
            flags
        } else {
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) }
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        if let Err(e) = Self::set_promisc(fd, ifindex, true) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let async_fd = match AsyncFd::new(fd) {
            Ok(async_fd) => async_fd,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(Error::Io(e));
            }
        };

        Ok(Self { async_fd, ifindex })
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let not_found = || Error::InterfaceNotFound {
            name: ifname.to_string(),
        };

        let ifname_c = CString::new(ifname).map_err(|_| not_found())?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = ifname_c.as_bytes_with_nul();
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(not_found());
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(not_found());
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn set_promisc(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
        let mreq = libc::packet_mreq {
            mr_ifindex: ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };

        let optname = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };

        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as u32,
            )
        };

        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        Ok(())
    }

    /// Receive the next frame arriving on the interface.
    ///
    /// Frames this host transmits are looped back to packet sockets by the
    /// kernel; they are skipped here.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        loop {
            let mut guard = self.async_fd.readable().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let mut from: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
                let mut from_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                let n = unsafe {
                    libc::recvfrom(
                        fd,
                        buf.as_mut_ptr() as *mut _,
                        buf.len(),
                        0,
                        &mut from as *mut _ as *mut libc::sockaddr,
                        &mut from_len,
                    )
                };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok((n as usize, from.sll_pkttype))
                }
            }) {
                Ok(Ok((_, pkttype))) if pkttype == libc::PACKET_OUTGOING as u8 => continue,
                Ok(Ok((len, _))) => return Ok(RxInfo { len }),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Transmit one frame
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.writable().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::send(fd, buf.as_ptr() as *const _, buf.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        let _ = Self::set_promisc(*self.async_fd.get_ref(), self.ifindex, false);
        unsafe { libc::close(*self.async_fd.get_ref()) };
    }
}

impl Capture for AfPacketSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        AfPacketSocket::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        AfPacketSocket::send(self, buf).await
    }
}
