use socket2::{Domain, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::io;
use thiserror::Error;
use tokio::net::UdpSocket as TokioUdpSocket;

/// Defines all possible errors for socket operations.
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Failed to create a new socket")]
    CreateSocket(#[source] io::Error),

    #[error("Failed to enable broadcast on socket")]
    SetBroadcast(#[source] io::Error),

    #[error("Failed to set SO_BINDTODEVICE on interface '{interface}'")]
    BindToDevice {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind socket to address")]
    BindSocket(#[source] io::Error),

    #[error("Failed to set SO_REUSEADDR on socket")]
    SetReuseAddress(#[source] io::Error),

    #[error("Failed to set socket to non-blocking mode")]
    SetNonBlocking(#[source] io::Error),

    #[error("Failed to convert socket to TokioUdpSocket")]
    ConvertToTokio(#[source] io::Error),

    #[error("Binding to a specific device is not supported on this platform")]
    BindToDeviceUnsupported,
}

/// Creates the server's `tokio::net::UdpSocket`, optionally bound to one
/// network device.
///
/// Broadcast and address reuse are enabled before binding so replies can
/// reach clients that do not hold an address yet.
///
/// # Arguments
/// * `bind` - The IPv4 address to bind to (0.0.0.0 for all interfaces).
/// * `port` - The port number to bind the socket to.
/// * `interface` - Optional device name (e.g. "eth0"); Linux only.
///
/// # Returns
/// A `Result` containing the configured `TokioUdpSocket` or a `SocketError`.
pub fn new_server_socket(
    bind: Ipv4Addr,
    port: u16,
    interface: Option<&str>,
) -> Result<TokioUdpSocket, SocketError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(SocketError::CreateSocket)?;

    // `SO_BROADCAST` is required for replying to clients without an address.
    socket
        .set_broadcast(true)
        .map_err(SocketError::SetBroadcast)?;

    // `SO_REUSEADDR` allows binding to an address that is already in use.
    socket
        .set_reuse_address(true)
        .map_err(SocketError::SetReuseAddress)?;

    if let Some(interface) = interface {
        bind_to_device(&socket, interface)?;
    }

    let addr = SocketAddr::V4(SocketAddrV4::new(bind, port));
    socket.bind(&addr.into()).map_err(SocketError::BindSocket)?;

    // Convert to a standard socket, then into a Tokio socket.
    let std_socket: StdUdpSocket = socket.into();
    std_socket
        .set_nonblocking(true)
        .map_err(SocketError::SetNonBlocking)?;
    TokioUdpSocket::from_std(std_socket).map_err(SocketError::ConvertToTokio)
}

/// Sets `SO_BINDTODEVICE`. This is an unsafe raw syscall.
/// It is safe here because we use a valid file descriptor and correct parameters.
#[cfg(target_os = "linux")]
fn bind_to_device(socket: &Socket, interface: &str) -> Result<(), SocketError> {
    use std::os::fd::AsRawFd;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            interface.as_ptr() as *const libc::c_void,
            interface.len() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(SocketError::BindToDevice {
            interface: interface.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Fallback for non-Linux systems where `SO_BINDTODEVICE` is not available.
#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &Socket, _interface: &str) -> Result<(), SocketError> {
    Err(SocketError::BindToDeviceUnsupported)
}
