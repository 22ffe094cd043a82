//! Protocol constants for TWAIN 1.9.
//!
//! Derived from `TWAIN.H`.

// ============================================================================
// Data Groups
// ============================================================================

pub const DG_CONTROL: u32 = 0x0001;
pub const DG_IMAGE: u32 = 0x0002;
pub const DG_AUDIO: u32 = 0x0004;

/// Set in `SupportedGroups` by applications that understand TWAIN 2.x.
pub const DF_APP2: u32 = 0x2000_0000;

// ============================================================================
// Data Argument Types
// ============================================================================

pub const DAT_NULL: u16 = 0x0000;
pub const DAT_CAPABILITY: u16 = 0x0001;
pub const DAT_EVENT: u16 = 0x0002;
pub const DAT_IDENTITY: u16 = 0x0003;
pub const DAT_PARENT: u16 = 0x0004;
pub const DAT_PENDINGXFERS: u16 = 0x0005;
pub const DAT_SETUPMEMXFER: u16 = 0x0006;
pub const DAT_SETUPFILEXFER: u16 = 0x0007;
pub const DAT_STATUS: u16 = 0x0008;
pub const DAT_USERINTERFACE: u16 = 0x0009;
pub const DAT_XFERGROUP: u16 = 0x000a;
pub const DAT_IMAGEINFO: u16 = 0x0101;
pub const DAT_IMAGELAYOUT: u16 = 0x0102;
pub const DAT_IMAGEMEMXFER: u16 = 0x0103;
pub const DAT_IMAGENATIVEXFER: u16 = 0x0104;
pub const DAT_IMAGEFILEXFER: u16 = 0x0105;

// ============================================================================
// Messages
// ============================================================================

pub const MSG_NULL: u16 = 0x0000;
pub const MSG_GET: u16 = 0x0001;
pub const MSG_GETCURRENT: u16 = 0x0002;
pub const MSG_GETDEFAULT: u16 = 0x0003;
pub const MSG_GETFIRST: u16 = 0x0004;
pub const MSG_GETNEXT: u16 = 0x0005;
pub const MSG_SET: u16 = 0x0006;
pub const MSG_RESET: u16 = 0x0007;
pub const MSG_QUERYSUPPORT: u16 = 0x0008;

/// DS -> App: an image is ready to transfer.
pub const MSG_XFERREADY: u16 = 0x0101;
/// DS -> App: the user asked to close the source.
pub const MSG_CLOSEDSREQ: u16 = 0x0102;
/// DS -> App: the user pressed OK in a settings-only UI.
pub const MSG_CLOSEDSOK: u16 = 0x0103;
pub const MSG_DEVICEEVENT: u16 = 0x0104;

pub const MSG_OPENDSM: u16 = 0x0301;
pub const MSG_CLOSEDSM: u16 = 0x0302;
pub const MSG_OPENDS: u16 = 0x0401;
pub const MSG_CLOSEDS: u16 = 0x0402;
pub const MSG_USERSELECT: u16 = 0x0403;
pub const MSG_DISABLEDS: u16 = 0x0501;
pub const MSG_ENABLEDS: u16 = 0x0502;
pub const MSG_PROCESSEVENT: u16 = 0x0601;
pub const MSG_ENDXFER: u16 = 0x0701;

// ============================================================================
// Return Codes
// ============================================================================

pub const TWRC_SUCCESS: u16 = 0;
pub const TWRC_FAILURE: u16 = 1;
pub const TWRC_CHECKSTATUS: u16 = 2;
pub const TWRC_CANCEL: u16 = 3;
pub const TWRC_DSEVENT: u16 = 4;
pub const TWRC_NOTDSEVENT: u16 = 5;
pub const TWRC_XFERDONE: u16 = 6;
pub const TWRC_ENDOFLIST: u16 = 7;
pub const TWRC_INFONOTSUPPORTED: u16 = 8;
pub const TWRC_DATANOTAVAILABLE: u16 = 9;

// ============================================================================
// Condition Codes
// ============================================================================

pub const TWCC_SUCCESS: u16 = 0;
pub const TWCC_BUMMER: u16 = 1;
pub const TWCC_LOWMEMORY: u16 = 2;
pub const TWCC_NODS: u16 = 3;
pub const TWCC_MAXCONNECTIONS: u16 = 4;
pub const TWCC_OPERATIONERROR: u16 = 5;
pub const TWCC_BADCAP: u16 = 6;
pub const TWCC_BADPROTOCOL: u16 = 9;
pub const TWCC_BADVALUE: u16 = 10;
pub const TWCC_SEQERROR: u16 = 11;
pub const TWCC_BADDEST: u16 = 12;
pub const TWCC_CAPUNSUPPORTED: u16 = 13;
pub const TWCC_CAPBADOPERATION: u16 = 14;
pub const TWCC_CAPSEQERROR: u16 = 15;
pub const TWCC_DENIED: u16 = 16;
pub const TWCC_FILEEXISTS: u16 = 17;
pub const TWCC_FILENOTFOUND: u16 = 18;
pub const TWCC_NOTEMPTY: u16 = 19;
pub const TWCC_PAPERJAM: u16 = 20;
pub const TWCC_PAPERDOUBLEFEED: u16 = 21;
pub const TWCC_FILEWRITEERROR: u16 = 22;
pub const TWCC_CHECKDEVICEONLINE: u16 = 23;

// ============================================================================
// Container Types
// ============================================================================

pub const TWON_ARRAY: u16 = 3;
pub const TWON_ENUMERATION: u16 = 4;
pub const TWON_ONEVALUE: u16 = 5;
pub const TWON_RANGE: u16 = 6;

/// Container type sent with GET requests: let the source pick.
pub const TWON_DONTCARE: u16 = 0xFFFF;

// ============================================================================
// Item Types
// ============================================================================

pub const TWTY_INT8: u16 = 0x0000;
pub const TWTY_INT16: u16 = 0x0001;
pub const TWTY_INT32: u16 = 0x0002;
pub const TWTY_UINT8: u16 = 0x0003;
pub const TWTY_UINT16: u16 = 0x0004;
pub const TWTY_UINT32: u16 = 0x0005;
pub const TWTY_BOOL: u16 = 0x0006;
pub const TWTY_FIX32: u16 = 0x0007;
pub const TWTY_FRAME: u16 = 0x0008;
pub const TWTY_STR32: u16 = 0x0009;
pub const TWTY_STR64: u16 = 0x000a;
pub const TWTY_STR128: u16 = 0x000b;
pub const TWTY_STR255: u16 = 0x000c;
pub const TWTY_STR1024: u16 = 0x000d;

/// Byte width of each item type, indexed by `TWTY_*`.
pub const TYPE_SIZES: [usize; 14] = [1, 2, 4, 1, 2, 4, 2, 4, 16, 34, 66, 130, 256, 1026];

// ============================================================================
// Query Support Flags
// ============================================================================

pub const TWQC_GET: u32 = 0x0001;
pub const TWQC_SET: u32 = 0x0002;
pub const TWQC_GETDEFAULT: u32 = 0x0004;
pub const TWQC_GETCURRENT: u32 = 0x0008;
pub const TWQC_RESET: u32 = 0x0010;

// ============================================================================
// Memory Flags
// ============================================================================

pub const TWMF_APPOWNS: u32 = 0x0001;
pub const TWMF_DSMOWNS: u32 = 0x0002;
pub const TWMF_DSOWNS: u32 = 0x0004;
pub const TWMF_POINTER: u32 = 0x0008;
pub const TWMF_HANDLE: u32 = 0x0010;

// ============================================================================
// Capability Values
// ============================================================================

pub const TWSX_NATIVE: u16 = 0;
pub const TWSX_FILE: u16 = 1;
pub const TWSX_MEMORY: u16 = 2;

pub const TWFF_TIFF: u16 = 0;
pub const TWFF_PICT: u16 = 1;
pub const TWFF_BMP: u16 = 2;
pub const TWFF_XBM: u16 = 3;
pub const TWFF_JFIF: u16 = 4;
pub const TWFF_FPX: u16 = 5;
pub const TWFF_TIFFMULTI: u16 = 6;
pub const TWFF_PNG: u16 = 7;
pub const TWFF_SPIFF: u16 = 8;
pub const TWFF_EXIF: u16 = 9;

/// File extension for each `TWFF_*` format.
pub const FILE_FORMAT_EXTENSIONS: [&str; 10] = [
    "tiff", "pict", "bmp", "xbm", "jpeg", "fpx", "tiff", "png", "spiff", "exif",
];

pub const TWUN_INCHES: u16 = 0;
pub const TWUN_CENTIMETERS: u16 = 1;
pub const TWUN_PICAS: u16 = 2;
pub const TWUN_POINTS: u16 = 3;
pub const TWUN_TWIPS: u16 = 4;
pub const TWUN_PIXELS: u16 = 5;

pub const TWCP_NONE: u16 = 0;
pub const TWCP_PACKBITS: u16 = 1;
pub const TWCP_GROUP31D: u16 = 2;
pub const TWCP_GROUP31DEOL: u16 = 3;
pub const TWCP_GROUP32D: u16 = 4;
pub const TWCP_GROUP4: u16 = 5;
pub const TWCP_JPEG: u16 = 6;
pub const TWCP_LZW: u16 = 7;
pub const TWCP_JBIG: u16 = 8;
pub const TWCP_PNG: u16 = 9;
pub const TWCP_RLE4: u16 = 10;
pub const TWCP_RLE8: u16 = 11;
pub const TWCP_BITFIELDS: u16 = 12;

pub const TWPT_BW: u16 = 0;
pub const TWPT_GRAY: u16 = 1;
pub const TWPT_RGB: u16 = 2;

// ============================================================================
// Capabilities
// ============================================================================

pub const CAP_CUSTOMBASE: u16 = 0x8000;
pub const CAP_XFERCOUNT: u16 = 0x0001;

pub const ICAP_COMPRESSION: u16 = 0x0100;
pub const ICAP_PIXELTYPE: u16 = 0x0101;
pub const ICAP_UNITS: u16 = 0x0102;
pub const ICAP_XFERMECH: u16 = 0x0103;

pub const CAP_AUTHOR: u16 = 0x1000;
pub const CAP_CAPTION: u16 = 0x1001;
pub const CAP_FEEDERENABLED: u16 = 0x1002;
pub const CAP_FEEDERLOADED: u16 = 0x1003;
pub const CAP_TIMEDATE: u16 = 0x1004;
pub const CAP_SUPPORTEDCAPS: u16 = 0x1005;
pub const CAP_EXTENDEDCAPS: u16 = 0x1006;
pub const CAP_AUTOFEED: u16 = 0x1007;
pub const CAP_CLEARPAGE: u16 = 0x1008;
pub const CAP_FEEDPAGE: u16 = 0x1009;
pub const CAP_REWINDPAGE: u16 = 0x100a;
pub const CAP_INDICATORS: u16 = 0x100b;
pub const CAP_SUPPORTEDCAPSEXT: u16 = 0x100c;
pub const CAP_PAPERDETECTABLE: u16 = 0x100d;
pub const CAP_UICONTROLLABLE: u16 = 0x100e;
pub const CAP_DEVICEONLINE: u16 = 0x100f;
pub const CAP_AUTOSCAN: u16 = 0x1010;
pub const CAP_THUMBNAILSENABLED: u16 = 0x1011;
pub const CAP_DUPLEX: u16 = 0x1012;
pub const CAP_DUPLEXENABLED: u16 = 0x1013;
pub const CAP_ENABLEDSUIONLY: u16 = 0x1014;
pub const CAP_CUSTOMDSDATA: u16 = 0x1015;
pub const CAP_ENDORSER: u16 = 0x1016;
pub const CAP_JOBCONTROL: u16 = 0x1017;
pub const CAP_SERIALNUMBER: u16 = 0x1024;
pub const CAP_LANGUAGE: u16 = 0x102c;
pub const CAP_BATTERYMINUTES: u16 = 0x1032;
pub const CAP_BATTERYPERCENTAGE: u16 = 0x1033;

pub const ICAP_AUTOBRIGHT: u16 = 0x1100;
pub const ICAP_BRIGHTNESS: u16 = 0x1101;
pub const ICAP_CONTRAST: u16 = 0x1103;
pub const ICAP_EXPOSURETIME: u16 = 0x1105;
pub const ICAP_GAMMA: u16 = 0x1108;
pub const ICAP_IMAGEFILEFORMAT: u16 = 0x110c;
pub const ICAP_ORIENTATION: u16 = 0x1110;
pub const ICAP_PHYSICALWIDTH: u16 = 0x1111;
pub const ICAP_PHYSICALHEIGHT: u16 = 0x1112;
pub const ICAP_FRAMES: u16 = 0x1114;
pub const ICAP_XNATIVERESOLUTION: u16 = 0x1116;
pub const ICAP_YNATIVERESOLUTION: u16 = 0x1117;
pub const ICAP_XRESOLUTION: u16 = 0x1118;
pub const ICAP_YRESOLUTION: u16 = 0x1119;
pub const ICAP_MAXFRAMES: u16 = 0x111a;
pub const ICAP_BITORDER: u16 = 0x111c;
pub const ICAP_PIXELFLAVOR: u16 = 0x111f;
pub const ICAP_PLANARCHUNKY: u16 = 0x1120;
pub const ICAP_ROTATION: u16 = 0x1121;
pub const ICAP_SUPPORTEDSIZES: u16 = 0x1122;
pub const ICAP_THRESHOLD: u16 = 0x1123;
pub const ICAP_XSCALING: u16 = 0x1124;
pub const ICAP_YSCALING: u16 = 0x1125;
pub const ICAP_BITDEPTH: u16 = 0x112b;
pub const ICAP_UNDEFINEDIMAGESIZE: u16 = 0x112d;
pub const ICAP_AUTODISCARDBLANKPAGES: u16 = 0x1134;
pub const ICAP_AUTOMATICDESKEW: u16 = 0x1151;
pub const ICAP_AUTOMATICROTATE: u16 = 0x1152;
pub const ICAP_JPEGQUALITY: u16 = 0x1153;

/// Capability id / name table used for display and lookup.
pub const CAPABILITY_NAMES: &[(u16, &str)] = &[
    (CAP_CUSTOMBASE, "CAP_CUSTOMBASE"),
    (CAP_XFERCOUNT, "CAP_XFERCOUNT"),
    (ICAP_COMPRESSION, "ICAP_COMPRESSION"),
    (ICAP_PIXELTYPE, "ICAP_PIXELTYPE"),
    (ICAP_UNITS, "ICAP_UNITS"),
    (ICAP_XFERMECH, "ICAP_XFERMECH"),
    (CAP_AUTHOR, "CAP_AUTHOR"),
    (CAP_CAPTION, "CAP_CAPTION"),
    (CAP_FEEDERENABLED, "CAP_FEEDERENABLED"),
    (CAP_FEEDERLOADED, "CAP_FEEDERLOADED"),
    (CAP_TIMEDATE, "CAP_TIMEDATE"),
    (CAP_SUPPORTEDCAPS, "CAP_SUPPORTEDCAPS"),
    (CAP_EXTENDEDCAPS, "CAP_EXTENDEDCAPS"),
    (CAP_AUTOFEED, "CAP_AUTOFEED"),
    (CAP_CLEARPAGE, "CAP_CLEARPAGE"),
    (CAP_FEEDPAGE, "CAP_FEEDPAGE"),
    (CAP_REWINDPAGE, "CAP_REWINDPAGE"),
    (CAP_INDICATORS, "CAP_INDICATORS"),
    (CAP_SUPPORTEDCAPSEXT, "CAP_SUPPORTEDCAPSEXT"),
    (CAP_PAPERDETECTABLE, "CAP_PAPERDETECTABLE"),
    (CAP_UICONTROLLABLE, "CAP_UICONTROLLABLE"),
    (CAP_DEVICEONLINE, "CAP_DEVICEONLINE"),
    (CAP_AUTOSCAN, "CAP_AUTOSCAN"),
    (CAP_THUMBNAILSENABLED, "CAP_THUMBNAILSENABLED"),
    (CAP_DUPLEX, "CAP_DUPLEX"),
    (CAP_DUPLEXENABLED, "CAP_DUPLEXENABLED"),
    (CAP_ENABLEDSUIONLY, "CAP_ENABLEDSUIONLY"),
    (CAP_CUSTOMDSDATA, "CAP_CUSTOMDSDATA"),
    (CAP_ENDORSER, "CAP_ENDORSER"),
    (CAP_JOBCONTROL, "CAP_JOBCONTROL"),
    (CAP_SERIALNUMBER, "CAP_SERIALNUMBER"),
    (CAP_LANGUAGE, "CAP_LANGUAGE"),
    (CAP_BATTERYMINUTES, "CAP_BATTERYMINUTES"),
    (CAP_BATTERYPERCENTAGE, "CAP_BATTERYPERCENTAGE"),
    (ICAP_AUTOBRIGHT, "ICAP_AUTOBRIGHT"),
    (ICAP_BRIGHTNESS, "ICAP_BRIGHTNESS"),
    (ICAP_CONTRAST, "ICAP_CONTRAST"),
    (ICAP_EXPOSURETIME, "ICAP_EXPOSURETIME"),
    (ICAP_GAMMA, "ICAP_GAMMA"),
    (ICAP_IMAGEFILEFORMAT, "ICAP_IMAGEFILEFORMAT"),
    (ICAP_ORIENTATION, "ICAP_ORIENTATION"),
    (ICAP_PHYSICALWIDTH, "ICAP_PHYSICALWIDTH"),
    (ICAP_PHYSICALHEIGHT, "ICAP_PHYSICALHEIGHT"),
    (ICAP_FRAMES, "ICAP_FRAMES"),
    (ICAP_XNATIVERESOLUTION, "ICAP_XNATIVERESOLUTION"),
    (ICAP_YNATIVERESOLUTION, "ICAP_YNATIVERESOLUTION"),
    (ICAP_XRESOLUTION, "ICAP_XRESOLUTION"),
    (ICAP_YRESOLUTION, "ICAP_YRESOLUTION"),
    (ICAP_MAXFRAMES, "ICAP_MAXFRAMES"),
    (ICAP_BITORDER, "ICAP_BITORDER"),
    (ICAP_PIXELFLAVOR, "ICAP_PIXELFLAVOR"),
    (ICAP_PLANARCHUNKY, "ICAP_PLANARCHUNKY"),
    (ICAP_ROTATION, "ICAP_ROTATION"),
    (ICAP_SUPPORTEDSIZES, "ICAP_SUPPORTEDSIZES"),
    (ICAP_THRESHOLD, "ICAP_THRESHOLD"),
    (ICAP_XSCALING, "ICAP_XSCALING"),
    (ICAP_YSCALING, "ICAP_YSCALING"),
    (ICAP_BITDEPTH, "ICAP_BITDEPTH"),
    (ICAP_UNDEFINEDIMAGESIZE, "ICAP_UNDEFINEDIMAGESIZE"),
    (ICAP_AUTODISCARDBLANKPAGES, "ICAP_AUTODISCARDBLANKPAGES"),
    (ICAP_AUTOMATICDESKEW, "ICAP_AUTOMATICDESKEW"),
    (ICAP_AUTOMATICROTATE, "ICAP_AUTOMATICROTATE"),
    (ICAP_JPEGQUALITY, "ICAP_JPEGQUALITY"),
];

/// Look up the symbolic name of a capability id.
pub fn capability_name(id: u16) -> Option<&'static str> {
    CAPABILITY_NAMES
        .iter()
        .find(|(cap, _)| *cap == id)
        .map(|(_, name)| *name)
}

/// Look up a capability id by its symbolic name (e.g. `"ICAP_XRESOLUTION"`).
pub fn capability_id(name: &str) -> Option<u16> {
    CAPABILITY_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(cap, _)| *cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_lookup_both_ways() {
        assert_eq!(capability_name(ICAP_XFERMECH), Some("ICAP_XFERMECH"));
        assert_eq!(capability_id("icap_xresolution"), Some(ICAP_XRESOLUTION));
        assert_eq!(capability_name(0x7777), None);
    }

    #[test]
    fn test_type_size_table() {
        assert_eq!(TYPE_SIZES[TWTY_UINT16 as usize], 2);
        assert_eq!(TYPE_SIZES[TWTY_FRAME as usize], 16);
        assert_eq!(TYPE_SIZES[TWTY_STR1024 as usize], 1026);
    }
}
