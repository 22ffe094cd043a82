//! In-process virtual data source for tests and the simulator CLI.
//!
//! `MockDsm` plays both the source manager and one open data source. It
//! keeps a call log, tracks every memory block, and can be scripted to
//! return arbitrary codes for a given `DAT`/`MSG` pair.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use byteorder::{ByteOrder, LittleEndian};

use super::traits::{Dsm, Handle};
use crate::codec::{Array, Container, Enumeration, Item, ItemType, Layout, OneValue, Range};
use crate::protocol::constants::*;
use crate::protocol::records::*;
use crate::transfer::native::BitmapInfoHeader;

/// One recorded `DSM_Entry` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsmCall {
    pub dg: u32,
    pub dat: u16,
    pub msg: u16,
    /// Destination source id, `None` for calls to the manager.
    pub dest: Option<u32>,
    pub rc: u16,
}

struct Block {
    data: Vec<u8>,
    locks: u32,
}

struct MockState {
    blocks: HashMap<Handle, Block>,
    next_handle: Handle,
    calls: Vec<DsmCall>,
    condition: u16,
    scripted: HashMap<(u16, u16), VecDeque<(u16, u16)>>,
    overridden: HashMap<(u16, u16), VecDeque<u16>>,

    dsm_open: bool,
    devices: Vec<Identity>,
    cursor: usize,
    default_device: Option<usize>,
    user_choice: Option<usize>,
    open_source: Option<u32>,

    capabilities: BTreeMap<u16, Container>,
    defaults: BTreeMap<u16, Container>,
    unsupported: HashSet<u16>,
    read_only: HashSet<u16>,

    modal_ui: bool,
    auto_transfer: bool,
    events: VecDeque<u16>,
    pending: VecDeque<i16>,
    setup_mem: SetupMemXfer,
    chunks: VecDeque<Vec<u8>>,
    memory_image: Vec<Vec<u8>>,
    bytes_per_row: u32,
    rows_sent: u32,
    native_image: Option<Vec<u8>>,
    file_payload: Vec<u8>,
    file_setup: Option<SetupFileXfer>,
    layout: ImageLayoutRecord,
    default_layout: ImageLayoutRecord,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            next_handle: 0x1000,
            calls: Vec::new(),
            condition: TWCC_SUCCESS,
            scripted: HashMap::new(),
            overridden: HashMap::new(),
            dsm_open: false,
            devices: Vec::new(),
            cursor: 0,
            default_device: None,
            user_choice: None,
            open_source: None,
            capabilities: BTreeMap::new(),
            defaults: BTreeMap::new(),
            unsupported: HashSet::new(),
            read_only: HashSet::new(),
            modal_ui: false,
            auto_transfer: false,
            events: VecDeque::new(),
            pending: VecDeque::new(),
            setup_mem: SetupMemXfer {
                min_buf_size: 1024,
                max_buf_size: 65536,
                preferred: 4096,
            },
            chunks: VecDeque::new(),
            memory_image: Vec::new(),
            bytes_per_row: 256,
            rows_sent: 0,
            native_image: None,
            file_payload: Vec::new(),
            file_setup: None,
            layout: ImageLayoutRecord::default(),
            default_layout: ImageLayoutRecord {
                frame: crate::codec::Frame::from_f64(0.0, 0.0, 8.5, 11.0),
                document_number: 1,
                page_number: 1,
                frame_number: 1,
            },
        }
    }
}

/// Scriptable in-process DSM plus data source.
pub struct MockDsm {
    state: Mutex<MockState>,
}

impl MockDsm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// A flatbed with the usual capabilities, ready for all three
    /// transfer mechanisms and announcing one image on enable.
    pub fn scanner(names: &[&str]) -> Self {
        let mock = Self::new();
        for name in names {
            mock.add_device(name);
        }
        let enum_u16 = |items: &[u16], current: u32| {
            Container::Enumeration(Enumeration {
                item_type: ItemType::UInt16,
                items: items.iter().map(|&v| Item::UInt16(v)).collect(),
                current_index: current,
                default_index: 0,
                layout: Layout::default(),
            })
        };
        let bool_value = |v: bool| Container::OneValue(OneValue {
            item_type: ItemType::Bool,
            item: Item::Bool(v),
        });
        let resolution = Container::Range(Range {
            item_type: ItemType::Fix32,
            min: Item::from(50.0),
            max: Item::from(1200.0),
            step: Item::from(1.0),
            default: Item::from(300.0),
            current: Item::from(300.0),
        });

        mock.set_capability(CAP_XFERCOUNT, Container::OneValue(OneValue {
            item_type: ItemType::Int16,
            item: Item::Int16(-1),
        }));
        mock.set_capability(
            ICAP_XFERMECH,
            enum_u16(&[TWSX_NATIVE, TWSX_FILE, TWSX_MEMORY], 0),
        );
        mock.set_capability(
            ICAP_IMAGEFILEFORMAT,
            enum_u16(&[TWFF_TIFF, TWFF_BMP, TWFF_JFIF, TWFF_PNG], 1),
        );
        mock.set_capability(ICAP_COMPRESSION, enum_u16(&[TWCP_NONE, TWCP_JPEG], 0));
        mock.set_capability(ICAP_PIXELTYPE, enum_u16(&[TWPT_BW, TWPT_GRAY, TWPT_RGB], 2));
        mock.set_capability(
            ICAP_UNITS,
            enum_u16(&[TWUN_INCHES, TWUN_CENTIMETERS, TWUN_PIXELS], 0),
        );
        mock.set_capability(ICAP_XRESOLUTION, resolution.clone());
        mock.set_capability(ICAP_YRESOLUTION, resolution);
        mock.set_capability(CAP_INDICATORS, bool_value(true));
        mock.set_capability(CAP_UICONTROLLABLE, bool_value(true));
        mock.set_online(true);

        mock.set_auto_transfer(true);
        mock.set_native_image(BitmapInfoHeader::sample_dib(64, 48, 24));
        mock.set_memory_transfer(4096, vec![vec![0x11; 4096], vec![0x22; 4096], vec![0x33; 1024]]);
        mock.set_file_payload(b"II*\0virtual image".to_vec());
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Register a virtual device and return its id.
    pub fn add_device(&self, product_name: &str) -> u32 {
        let mut st = self.state();
        let id = 100 + st.devices.len() as u32;
        st.devices.push(Identity {
            id,
            version: Version {
                major: 1,
                minor: 0,
                language: 13,
                country: 1,
                info: "virtual".into(),
            },
            protocol_major: 1,
            protocol_minor: 9,
            supported_groups: DG_CONTROL | DG_IMAGE,
            manufacturer: "Virtual Devices".into(),
            product_family: "Simulator".into(),
            product_name: product_name.into(),
        });
        id
    }

    pub fn set_default_device(&self, product_name: &str) {
        let mut st = self.state();
        st.default_device = st
            .devices
            .iter()
            .position(|d| d.product_name == product_name);
    }

    /// Device the user picks in the selection dialog; `None` cancels it.
    pub fn set_user_selection(&self, product_name: Option<&str>) {
        let mut st = self.state();
        st.user_choice = product_name
            .and_then(|name| st.devices.iter().position(|d| d.product_name == name));
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    pub fn set_capability(&self, cap: u16, container: Container) {
        let mut st = self.state();
        st.defaults.insert(cap, container.clone());
        st.capabilities.insert(cap, container);
    }

    /// Advertise `cap` in `CAP_SUPPORTEDCAPS` but fail every request for it.
    pub fn set_unsupported(&self, cap: u16) {
        self.state().unsupported.insert(cap);
    }

    /// Accept `MSG_SET` for `cap` without changing anything.
    pub fn set_read_only(&self, cap: u16) {
        self.state().read_only.insert(cap);
    }

    pub fn set_online(&self, online: bool) {
        self.set_capability(
            CAP_DEVICEONLINE,
            Container::OneValue(OneValue {
                item_type: ItemType::Bool,
                item: Item::Bool(online),
            }),
        );
    }

    pub fn capability(&self, cap: u16) -> Option<Container> {
        self.state().capabilities.get(&cap).cloned()
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Return `rc` for the next `dat`/`msg` call instead of handling it.
    pub fn script(&self, dat: u16, msg: u16, rc: u16) {
        self.script_condition(dat, msg, rc, TWCC_SUCCESS);
    }

    /// Fail the next `dat`/`msg` call with the given condition code.
    pub fn script_failure(&self, dat: u16, msg: u16, condition: u16) {
        self.script_condition(dat, msg, TWRC_FAILURE, condition);
    }

    /// Handle the next `dat`/`msg` call as usual, then report `rc`.
    pub fn script_after(&self, dat: u16, msg: u16, rc: u16) {
        self.state()
            .overridden
            .entry((dat, msg))
            .or_default()
            .push_back(rc);
    }

    fn script_condition(&self, dat: u16, msg: u16, rc: u16, condition: u16) {
        self.state()
            .scripted
            .entry((dat, msg))
            .or_default()
            .push_back((rc, condition));
    }

    pub fn set_modal_ui(&self, modal: bool) {
        self.state().modal_ui = modal;
    }

    /// Queue `MSG_XFERREADY` whenever the source is enabled.
    pub fn set_auto_transfer(&self, enabled: bool) {
        self.state().auto_transfer = enabled;
    }

    /// Queue a message for the next `MSG_PROCESSEVENT`.
    pub fn queue_event(&self, message: u16) {
        self.state().events.push_back(message);
    }

    /// Counts reported by successive `MSG_ENDXFER` calls (then `0`).
    pub fn set_pending_transfers(&self, counts: impl IntoIterator<Item = i16>) {
        self.state().pending = counts.into_iter().collect();
    }

    pub fn set_memory_transfer(&self, preferred: i32, chunks: Vec<Vec<u8>>) {
        let mut st = self.state();
        st.setup_mem.preferred = preferred;
        st.setup_mem.max_buf_size = st.setup_mem.max_buf_size.max(preferred);
        st.chunks = chunks.iter().cloned().collect();
        st.memory_image = chunks;
        st.rows_sent = 0;
    }

    pub fn set_native_image(&self, dib: Vec<u8>) {
        self.state().native_image = Some(dib);
    }

    pub fn set_file_payload(&self, payload: Vec<u8>) {
        self.state().file_payload = payload;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self) -> Vec<DsmCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn count_calls(&self, dat: u16, msg: u16) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.dat == dat && c.msg == msg)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn live_blocks(&self) -> usize {
        self.state().blocks.len()
    }

    pub fn locked_blocks(&self) -> usize {
        self.state().blocks.values().filter(|b| b.locks > 0).count()
    }

    pub fn is_dsm_open(&self) -> bool {
        self.state().dsm_open
    }

    pub fn open_source_id(&self) -> Option<u32> {
        self.state().open_source
    }

    pub fn file_setup(&self) -> Option<SetupFileXfer> {
        self.state().file_setup.clone()
    }

    pub fn image_layout(&self) -> ImageLayoutRecord {
        self.state().layout
    }
}

impl Default for MockDsm {
    fn default() -> Self {
        Self::new()
    }
}

fn put(data: &mut [u8], bytes: &[u8]) -> bool {
    if data.len() < bytes.len() {
        return false;
    }
    data[..bytes.len()].copy_from_slice(bytes);
    true
}

impl MockState {
    fn fail(&mut self, condition: u16) -> u16 {
        self.condition = condition;
        TWRC_FAILURE
    }

    fn new_block(&mut self, data: Vec<u8>) -> Handle {
        let handle = self.next_handle;
        self.next_handle += 0x10;
        self.blocks.insert(handle, Block { data, locks: 0 });
        handle
    }

    fn dispatch(&mut self, origin: &mut [u8], dg: u32, dat: u16, msg: u16, data: &mut [u8]) -> u16 {
        match (dg, dat, msg) {
            (DG_CONTROL, DAT_PARENT, MSG_OPENDSM) => {
                self.dsm_open = true;
                LittleEndian::write_u32(origin, 1);
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_PARENT, MSG_CLOSEDSM) => {
                self.dsm_open = false;
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_STATUS, MSG_GET) => {
                let status = Status {
                    condition_code: self.condition,
                    data: 0,
                };
                self.condition = TWCC_SUCCESS;
                put(data, &status.to_bytes());
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_IDENTITY, _) => self.identity(msg, data),
            (DG_CONTROL, DAT_CAPABILITY, _) => self.capability_request(msg, data),
            (DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDS) => {
                LittleEndian::write_u16(&mut data[2..], self.modal_ui as u16);
                if self.auto_transfer {
                    self.events.push_back(MSG_XFERREADY);
                }
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_USERINTERFACE, MSG_DISABLEDS) => TWRC_SUCCESS,
            (DG_CONTROL, DAT_EVENT, MSG_PROCESSEVENT) => match self.events.pop_front() {
                Some(message) => {
                    LittleEndian::write_u16(&mut data[8..], message);
                    TWRC_DSEVENT
                }
                None => TWRC_NOTDSEVENT,
            },
            (DG_CONTROL, DAT_PENDINGXFERS, MSG_ENDXFER) => {
                let count = self.pending.pop_front().unwrap_or(0);
                LittleEndian::write_i16(data, count);
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_PENDINGXFERS, MSG_RESET) => {
                self.pending.clear();
                LittleEndian::write_i16(data, 0);
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_PENDINGXFERS, MSG_GET) => {
                let count = self.pending.front().copied().unwrap_or(0);
                LittleEndian::write_i16(data, count);
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_SETUPMEMXFER, MSG_GET) => {
                put(data, &self.setup_mem.to_bytes());
                TWRC_SUCCESS
            }
            (DG_CONTROL, DAT_SETUPFILEXFER, MSG_SET) => match SetupFileXfer::from_bytes(data) {
                Ok(setup) => {
                    self.file_setup = Some(setup);
                    TWRC_SUCCESS
                }
                Err(_) => self.fail(TWCC_BADVALUE),
            },
            (DG_IMAGE, DAT_IMAGEMEMXFER, MSG_GET) => self.memory_chunk(data),
            (DG_IMAGE, DAT_IMAGENATIVEXFER, MSG_GET) => match self.native_image.clone() {
                Some(dib) => {
                    let handle = self.new_block(dib);
                    put(data, &HandleRecord(handle).to_bytes());
                    TWRC_XFERDONE
                }
                None => self.fail(TWCC_SEQERROR),
            },
            (DG_IMAGE, DAT_IMAGEFILEXFER, MSG_GET) => {
                let Some(setup) = self.file_setup.clone() else {
                    return self.fail(TWCC_SEQERROR);
                };
                match std::fs::write(&setup.file_name, &self.file_payload) {
                    Ok(()) => TWRC_XFERDONE,
                    Err(_) => self.fail(TWCC_FILEWRITEERROR),
                }
            }
            (DG_IMAGE, DAT_IMAGELAYOUT, MSG_GET | MSG_GETCURRENT) => {
                put(data, &self.layout.to_bytes());
                TWRC_SUCCESS
            }
            (DG_IMAGE, DAT_IMAGELAYOUT, MSG_GETDEFAULT) => {
                put(data, &self.default_layout.to_bytes());
                TWRC_SUCCESS
            }
            (DG_IMAGE, DAT_IMAGELAYOUT, MSG_SET) => match ImageLayoutRecord::from_bytes(data) {
                Ok(layout) => {
                    self.layout = layout;
                    TWRC_SUCCESS
                }
                Err(_) => self.fail(TWCC_BADVALUE),
            },
            (DG_IMAGE, DAT_IMAGELAYOUT, MSG_RESET) => {
                self.layout = self.default_layout;
                put(data, &self.layout.to_bytes());
                TWRC_SUCCESS
            }
            _ => self.fail(TWCC_BADPROTOCOL),
        }
    }

    fn identity(&mut self, msg: u16, data: &mut [u8]) -> u16 {
        match msg {
            MSG_GETFIRST => {
                if self.devices.is_empty() {
                    return self.fail(TWCC_NODS);
                }
                self.cursor = 1;
                put(data, &self.devices[0].to_bytes());
                TWRC_SUCCESS
            }
            MSG_GETNEXT => match self.devices.get(self.cursor) {
                Some(device) => {
                    put(data, &device.to_bytes());
                    self.cursor += 1;
                    TWRC_SUCCESS
                }
                None => TWRC_ENDOFLIST,
            },
            MSG_GETDEFAULT => {
                let index = self.default_device.unwrap_or(0);
                match self.devices.get(index) {
                    Some(device) => {
                        put(data, &device.to_bytes());
                        TWRC_SUCCESS
                    }
                    None => self.fail(TWCC_NODS),
                }
            }
            MSG_USERSELECT => match self.user_choice.and_then(|i| self.devices.get(i)) {
                Some(device) => {
                    put(data, &device.to_bytes());
                    TWRC_SUCCESS
                }
                None => TWRC_CANCEL,
            },
            MSG_OPENDS => {
                let Ok(wanted) = Identity::from_bytes(data) else {
                    return self.fail(TWCC_BADVALUE);
                };
                let found = self.devices.iter().find(|d| {
                    (wanted.id != 0 && d.id == wanted.id)
                        || (!wanted.product_name.is_empty()
                            && d.product_name == wanted.product_name)
                });
                match found.cloned() {
                    Some(device) => {
                        self.open_source = Some(device.id);
                        put(data, &device.to_bytes());
                        TWRC_SUCCESS
                    }
                    None => self.fail(TWCC_NODS),
                }
            }
            MSG_CLOSEDS => {
                self.open_source = None;
                TWRC_SUCCESS
            }
            _ => self.fail(TWCC_BADPROTOCOL),
        }
    }

    fn supported_caps(&self) -> Container {
        let mut ids: Vec<u16> = self.capabilities.keys().copied().collect();
        ids.extend(self.unsupported.iter().copied());
        ids.sort_unstable();
        ids.dedup();
        Container::Array(Array {
            item_type: ItemType::UInt16,
            items: ids.into_iter().map(Item::UInt16).collect(),
            layout: Layout::default(),
        })
    }

    fn capability_request(&mut self, msg: u16, data: &mut [u8]) -> u16 {
        let Ok(mut record) = CapabilityRecord::from_bytes(data) else {
            return self.fail(TWCC_BADVALUE);
        };
        let cap = record.cap;
        if self.unsupported.contains(&cap) {
            return self.fail(TWCC_CAPUNSUPPORTED);
        }
        if msg == MSG_SET {
            return self.set_capability(&record);
        }

        let stored = match self.capabilities.get(&cap) {
            Some(c) => c.clone(),
            None if cap == CAP_SUPPORTEDCAPS => self.supported_caps(),
            None => return self.fail(TWCC_CAPUNSUPPORTED),
        };
        let one = |item: Item| {
            Container::OneValue(OneValue {
                item_type: stored.item_type(),
                item,
            })
        };
        let reply = match msg {
            MSG_GET => stored.clone(),
            MSG_GETCURRENT => match stored.current_value() {
                Ok(item) => one(item),
                Err(_) => stored.clone(),
            },
            MSG_GETDEFAULT => match stored.default_value() {
                Ok(item) => one(item),
                Err(_) => stored.clone(),
            },
            MSG_RESET => {
                let reset = self
                    .defaults
                    .get(&cap)
                    .cloned()
                    .unwrap_or_else(|| stored.clone());
                self.capabilities.insert(cap, reset.clone());
                reset
            }
            MSG_QUERYSUPPORT => {
                let flags = if self.read_only.contains(&cap) {
                    TWQC_GET | TWQC_GETCURRENT | TWQC_GETDEFAULT
                } else {
                    TWQC_GET | TWQC_SET | TWQC_GETCURRENT | TWQC_GETDEFAULT | TWQC_RESET
                };
                Container::OneValue(OneValue {
                    item_type: ItemType::UInt32,
                    item: Item::UInt32(flags),
                })
            }
            _ => return self.fail(TWCC_CAPBADOPERATION),
        };
        let Ok(bytes) = reply.to_bytes() else {
            return self.fail(TWCC_BUMMER);
        };
        record.con_type = reply.con_type();
        record.container = self.new_block(bytes);
        put(data, &record.to_bytes());
        TWRC_SUCCESS
    }

    fn set_capability(&mut self, record: &CapabilityRecord) -> u16 {
        let Some(bytes) = self.blocks.get(&record.container).map(|b| b.data.clone()) else {
            return self.fail(TWCC_BADVALUE);
        };
        let Ok(incoming) = Container::decode(record.con_type, &bytes, Layout::default()) else {
            return self.fail(TWCC_BADVALUE);
        };
        if self.read_only.contains(&record.cap) {
            return TWRC_SUCCESS;
        }
        let stored = self.capabilities.get(&record.cap).cloned();
        let merged = match (stored, incoming) {
            (
                Some(mut stored @ (Container::Enumeration(_) | Container::Range(_))),
                Container::OneValue(one),
            ) => {
                if stored.set_current_value(one.item).is_err() {
                    return self.fail(TWCC_BADVALUE);
                }
                stored
            }
            (_, incoming) => incoming,
        };
        self.capabilities.insert(record.cap, merged);
        TWRC_SUCCESS
    }

    fn memory_chunk(&mut self, data: &mut [u8]) -> u16 {
        let Ok(mut request) = ImageMemXfer::from_bytes(data) else {
            return self.fail(TWCC_BADVALUE);
        };
        let Some(chunk) = self.chunks.pop_front() else {
            return self.fail(TWCC_SEQERROR);
        };
        match self.blocks.get_mut(&request.memory) {
            Some(block) if block.data.len() >= chunk.len() => {
                block.data[..chunk.len()].copy_from_slice(&chunk);
            }
            _ => return self.fail(TWCC_BADVALUE),
        }
        let rows = chunk.len() as u32 / self.bytes_per_row.max(1);
        request.compression = TWCP_NONE;
        request.bytes_per_row = self.bytes_per_row;
        request.columns = self.bytes_per_row / 3;
        request.rows = rows;
        request.x_offset = 0;
        request.y_offset = self.rows_sent;
        request.bytes_written = chunk.len() as u32;
        self.rows_sent += rows;
        put(data, &request.to_bytes());
        if self.chunks.is_empty() {
            self.chunks = self.memory_image.iter().cloned().collect();
            self.rows_sent = 0;
            TWRC_XFERDONE
        } else {
            TWRC_SUCCESS
        }
    }
}

impl Dsm for MockDsm {
    fn entry(
        &self,
        origin: &mut [u8],
        dest: Option<&[u8]>,
        dg: u32,
        dat: u16,
        msg: u16,
        data: &mut [u8],
    ) -> u16 {
        let mut st = self.state();
        let dest_id = dest.map(|d| if d.len() >= 4 { LittleEndian::read_u32(d) } else { 0 });
        let rc = match st.scripted.get_mut(&(dat, msg)).and_then(|q| q.pop_front()) {
            Some((rc, condition)) => {
                if rc == TWRC_FAILURE {
                    st.condition = condition;
                }
                rc
            }
            None => {
                let rc = st.dispatch(origin, dg, dat, msg, data);
                st.overridden
                    .get_mut(&(dat, msg))
                    .and_then(|q| q.pop_front())
                    .unwrap_or(rc)
            }
        };
        st.calls.push(DsmCall {
            dg,
            dat,
            msg,
            dest: dest_id,
            rc,
        });
        rc
    }

    fn alloc(&self, size: usize) -> Option<Handle> {
        Some(self.state().new_block(vec![0u8; size]))
    }

    fn lock(&self, handle: Handle) -> bool {
        match self.state().blocks.get_mut(&handle) {
            Some(block) => {
                block.locks += 1;
                true
            }
            None => false,
        }
    }

    fn unlock(&self, handle: Handle) -> bool {
        match self.state().blocks.get_mut(&handle) {
            Some(block) if block.locks > 0 => {
                block.locks -= 1;
                true
            }
            _ => false,
        }
    }

    fn free(&self, handle: Handle) {
        self.state().blocks.remove(&handle);
    }

    fn block_size(&self, handle: Handle) -> usize {
        self.state().blocks.get(&handle).map_or(0, |b| b.data.len())
    }

    fn read(&self, handle: Handle, offset: usize, buf: &mut [u8]) -> bool {
        match self.state().blocks.get(&handle) {
            Some(block) if block.locks > 0 && offset + buf.len() <= block.data.len() => {
                buf.copy_from_slice(&block.data[offset..offset + buf.len()]);
                true
            }
            _ => false,
        }
    }

    fn write(&self, handle: Handle, offset: usize, data: &[u8]) -> bool {
        match self.state().blocks.get_mut(&handle) {
            Some(block) if block.locks > 0 && offset + data.len() <= block.data.len() => {
                block.data[offset..offset + data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(mock: &MockDsm, dat: u16, msg: u16, data: &mut [u8]) -> u16 {
        let mut origin = Identity::default().to_bytes();
        mock.entry(&mut origin, None, DG_CONTROL, dat, msg, data)
    }

    #[test]
    fn test_identity_enumeration() {
        let mock = MockDsm::new();
        mock.add_device("Alpha");
        mock.add_device("Beta");
        let mut buf = vec![0u8; Identity::SIZE];
        assert_eq!(call(&mock, DAT_IDENTITY, MSG_GETFIRST, &mut buf), TWRC_SUCCESS);
        assert_eq!(Identity::from_bytes(&buf).unwrap().product_name, "Alpha");
        assert_eq!(call(&mock, DAT_IDENTITY, MSG_GETNEXT, &mut buf), TWRC_SUCCESS);
        assert_eq!(Identity::from_bytes(&buf).unwrap().product_name, "Beta");
        assert_eq!(call(&mock, DAT_IDENTITY, MSG_GETNEXT, &mut buf), TWRC_ENDOFLIST);
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_scripted_failure_sets_condition() {
        let mock = MockDsm::new();
        mock.script_failure(DAT_USERINTERFACE, MSG_ENABLEDS, TWCC_PAPERJAM);
        let mut ui = UserInterface::default().to_bytes();
        assert_eq!(call(&mock, DAT_USERINTERFACE, MSG_ENABLEDS, &mut ui), TWRC_FAILURE);
        let mut status = vec![0u8; Status::SIZE];
        call(&mock, DAT_STATUS, MSG_GET, &mut status);
        assert_eq!(
            Status::from_bytes(&status).unwrap().condition_code,
            TWCC_PAPERJAM
        );
        // The script is consumed.
        assert_eq!(call(&mock, DAT_USERINTERFACE, MSG_ENABLEDS, &mut ui), TWRC_SUCCESS);
    }

    #[test]
    fn test_blocks_require_lock() {
        let mock = MockDsm::new();
        let handle = mock.alloc(8).unwrap();
        assert!(!mock.write(handle, 0, &[1]));
        assert!(mock.lock(handle));
        assert!(mock.write(handle, 0, &[1]));
        assert!(mock.unlock(handle));
        assert!(!mock.unlock(handle));
        mock.free(handle);
        assert_eq!(mock.live_blocks(), 0);
    }

    #[test]
    fn test_supported_caps_lists_unsupported_ids() {
        let mock = MockDsm::scanner(&["Flatbed"]);
        mock.set_unsupported(ICAP_GAMMA);
        let caps = mock.state().supported_caps();
        assert!(caps.items().contains(&Item::UInt16(ICAP_GAMMA)));
        assert!(caps.items().contains(&Item::UInt16(ICAP_XFERMECH)));
    }
}
