pub mod packet_queue;
pub mod picture_queue;

pub use packet_queue::{Dequeued, Packet, PacketQueue};
pub use picture_queue::{AllocRequest, Picture, PictureQueue};
